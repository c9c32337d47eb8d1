use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{
    error::FixmeError,
    package::Action,
    project::{Project, ProjectId, ProjectRecord, ProjectServices},
};

/// Requests a client can make of its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Import paths of every discoverable package with this name.
    FindPackages(String),
    SetName(String),
    /// Change a package's action: one of `none`, `watch`, `test`, `lint`. Unknown actions and
    /// unknown packages are ignored.
    SetPackageAction { import_path: String, action: String },
    NewProject,
    /// Switch to a stored project; `None` opens the first stored one.
    LoadProject(Option<ProjectId>),
    /// Delete the active project and switch to the next stored one.
    DeleteProject,
    ListProjects,
    GetProject,
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Op::FindPackages(name) => write!(f, "FindPackages({name})"),
            Op::SetName(name) => write!(f, "SetName({name})"),
            Op::SetPackageAction {
                import_path,
                action,
            } => write!(f, "SetPackageAction({import_path}: {action})"),
            Op::NewProject => write!(f, "NewProject"),
            Op::LoadProject(Some(id)) => write!(f, "LoadProject({id})"),
            Op::LoadProject(None) => write!(f, "LoadProject(first)"),
            Op::DeleteProject => write!(f, "DeleteProject"),
            Op::ListProjects => write!(f, "ListProjects"),
            Op::GetProject => write!(f, "GetProject"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpResult {
    Ok,
    Packages(Vec<String>),
    Project(ProjectRecord),
    Projects(Vec<ProjectRecord>),
}

impl Display for OpResult {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OpResult::Ok => write!(f, "Ok"),
            OpResult::Packages(v) => write!(f, "Packages({})", v.join(", ")),
            OpResult::Project(r) => write!(f, "Project({}: {} packages)", r.name, r.packages.len()),
            OpResult::Projects(v) => write!(
                f,
                "Projects({})",
                v.iter()
                    .map(|r| r.name.clone())
                    .collect::<Vec<String>>()
                    .join(", ")
            ),
        }
    }
}

/// One client's view: the active project plus the services it was built from.
pub struct Session {
    services: ProjectServices,
    project: Project,
    live: bool,
}

impl Session {
    /// Open the first stored project, or create and save a fresh one when there is none.
    pub fn open(services: ProjectServices) -> Result<Self, FixmeError> {
        let project = Self::load_or_create(&services, None)?;
        Ok(Session {
            services,
            project,
            live: false,
        })
    }

    fn load_or_create(
        services: &ProjectServices,
        id: Option<&ProjectId>,
    ) -> Result<Project, FixmeError> {
        let record = match &services.store {
            Some(store) => store.load(id)?,
            None => None,
        };
        match (record, id) {
            (Some(record), _) => Ok(Project::from_record(record, services.clone())),
            (None, Some(id)) => Err(FixmeError::NotFound(format!("project {id}"))),
            (None, None) => {
                let project = Project::new(services.clone());
                project.save()?;
                Ok(project)
            }
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn project_mut(&mut self) -> &mut Project {
        &mut self.project
    }

    /// Resolve and start the active project, and every project switched to from now on.
    pub fn start(&mut self) -> Result<(), FixmeError> {
        self.live = true;
        let resolved = self.project.resolve();
        self.project.start()?;
        resolved.map(|_| ())
    }

    pub async fn shutdown(&mut self) -> Result<(), FixmeError> {
        self.live = false;
        self.project.shutdown().await
    }

    fn activate(&mut self, project: Project) -> Result<(), FixmeError> {
        let mut previous = std::mem::replace(&mut self.project, project);
        previous.stop();
        if self.live {
            self.start()?;
        }
        Ok(())
    }

    pub fn handle(&mut self, op: Op) -> Result<OpResult, FixmeError> {
        tracing::debug!("[Session] {}", op);
        match op {
            Op::FindPackages(name) => Ok(OpResult::Packages(
                self.services
                    .discovery
                    .by_name(&name)
                    .iter()
                    .map(|d| d.import_path.clone())
                    .collect(),
            )),
            Op::SetName(name) => {
                self.project.set_name(name)?;
                Ok(OpResult::Ok)
            }
            Op::SetPackageAction {
                import_path,
                action,
            } => {
                let Ok(action) = action.parse::<Action>() else {
                    tracing::debug!("[Session] Ignoring unknown action '{}'", action);
                    return Ok(OpResult::Ok);
                };
                let Some(desc) = self.services.discovery.by_import(&import_path).cloned() else {
                    tracing::debug!("[Session] Ignoring unknown package '{}'", import_path);
                    return Ok(OpResult::Ok);
                };
                self.project.set_action(&desc, action)?;
                self.project.resolve()?;
                if self.project.is_running() {
                    self.project.trigger()?;
                }
                Ok(OpResult::Ok)
            }
            Op::NewProject => {
                let project = Project::new(self.services.clone());
                project.save()?;
                self.activate(project)?;
                Ok(OpResult::Project(self.project.record()))
            }
            Op::LoadProject(id) => {
                let project = Self::load_or_create(&self.services, id.as_ref())?;
                self.activate(project)?;
                Ok(OpResult::Project(self.project.record()))
            }
            Op::DeleteProject => {
                self.project.delete()?;
                self.handle(Op::LoadProject(None))
            }
            Op::ListProjects => Ok(OpResult::Projects(match &self.services.store {
                Some(store) => store.list()?,
                None => vec![self.project.record()],
            })),
            Op::GetProject => Ok(OpResult::Project(self.project.record())),
        }
    }
}
