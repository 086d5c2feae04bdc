use std::sync::Arc;

use actix_web::{error::BlockingError, web};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::Instrument as _;

use crate::{
    deploy::DeployDescriptor,
    git::{BranchSpec, RepoSync},
    github::{CreateEvent, DeleteEvent, Event, PushEvent, RefKind, RefType},
    runner::{RunReport, Runner},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Run the deployment descriptor right after a new branch is cloned.
    pub deploy_on_create: bool,
}

/// Single consumer of webhook events.
///
/// Git operations for one event finish before the next event is looked at.
/// Deployment runs are detached: nothing waits for them, and two runs for the
/// same branch may overlap when pushes arrive close together.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    sync: Arc<RepoSync>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(sync: RepoSync, options: DispatchOptions) -> Self {
        Self {
            sync: Arc::new(sync),
            options,
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<Event>) {
        while let Some(event) = rx.recv().await {
            let span = tracing::info_span!(
                "event",
                kind = event.kind().as_str(),
                repo.owner = event
                    .repository()
                    .map(|repo| repo.owner.login.as_str())
                    .unwrap_or("-"),
                repo.name = event
                    .repository()
                    .map(|repo| repo.name.as_str())
                    .unwrap_or("-"),
                sender = event
                    .sender()
                    .map(|user| user.login.as_str())
                    .unwrap_or("-"),
            );
            self.dispatch(event).instrument(span).await;
        }
        tracing::info!("Event channel closed, dispatcher stopping");
    }

    /// Handles one event; returns the handle of the deployment run it
    /// started, if any.
    pub async fn dispatch(&self, event: Event) -> Option<JoinHandle<RunReport>> {
        match event {
            Event::Push(push) => self.on_push(push).await,
            Event::Create(create) => self.on_create(create).await,
            Event::Delete(delete) => {
                self.on_delete(delete).await;
                None
            }
            Event::Ping(ping) => {
                tracing::info!(
                    hook_id = ping.hook_id.unwrap_or_default(),
                    "Received ping: {}",
                    ping.zen.as_deref().unwrap_or("")
                );
                None
            }
        }
    }

    async fn on_push(&self, push: PushEvent) -> Option<JoinHandle<RunReport>> {
        if push.reference.kind() != RefKind::Branch {
            tracing::debug!("Ignoring push to {}", push.reference);
            return None;
        }
        if push.deleted {
            tracing::debug!("Ignoring push deleting {}", push.reference);
            return None;
        }

        let spec = BranchSpec::new(
            push.repository.owner.login,
            push.repository.name,
            push.reference.name(),
        );
        tracing::info!(
            before = push.before.as_str(),
            after = push.after.as_str(),
            head = push
                .head_commit
                .as_ref()
                .map(|commit| commit.message.as_str())
                .unwrap_or("-"),
            forced = push.forced,
            pusher = push
                .pusher
                .as_ref()
                .map(|pusher| pusher.name.as_str())
                .unwrap_or("-"),
            "Syncing {}",
            spec
        );

        match self.blocking(spec.clone(), |sync, spec| sync.pull(spec)).await {
            Ok(Ok(outcome)) => tracing::debug!("Synced {}: {:?}", spec, outcome),
            Ok(Err(err)) if err.left_stale_copy() => {
                tracing::warn!("Deploying {} from a stale working copy: {}", spec, err)
            }
            Ok(Err(err)) => {
                tracing::error!("Skipping deployment of {}: {}", spec, err);
                return None;
            }
            Err(err) => {
                tracing::error!("Sync task for {} failed: {}", spec, err);
                return None;
            }
        }

        self.deploy(&spec)
    }

    async fn on_create(&self, create: CreateEvent) -> Option<JoinHandle<RunReport>> {
        if create.ref_type != RefType::Branch {
            tracing::debug!("Ignoring created {:?} {}", create.ref_type, create.reference);
            return None;
        }

        let spec = BranchSpec::new(
            create.repository.owner.login,
            create.repository.name,
            create.reference.name(),
        );
        let cloned = self
            .blocking(spec.clone(), |sync, spec| sync.clone_branch(spec).map(drop))
            .await;
        match cloned {
            Ok(Ok(_)) if self.options.deploy_on_create => self.deploy(&spec),
            Ok(Ok(_)) => None,
            // already logged by the clone itself
            Ok(Err(_)) => None,
            Err(err) => {
                tracing::error!("Clone task for {} failed: {}", spec, err);
                None
            }
        }
    }

    async fn on_delete(&self, delete: DeleteEvent) {
        if delete.ref_type == RefType::Repository {
            return;
        }

        let spec = BranchSpec::new(
            delete.repository.owner.login,
            delete.repository.name,
            delete.reference.name(),
        );
        tracing::info!("Removing working copy of {}", spec);
        if let Err(err) = self.blocking(spec.clone(), |sync, spec| sync.remove(spec)).await {
            tracing::error!("Remove task for {} failed: {}", spec, err);
        }
    }

    /// Loads the descriptor from the working copy and spawns the run.
    fn deploy(&self, spec: &BranchSpec) -> Option<JoinHandle<RunReport>> {
        let path = self.sync.path(spec);
        let descriptor = match DeployDescriptor::load(&path) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                tracing::warn!("No deployment for {}: {}", spec, err);
                return None;
            }
        };

        tracing::info!(
            commands = descriptor.commands.len(),
            "Starting deployment of {} in {:?}",
            spec,
            path
        );
        let span = tracing::info_span!(
            "deploy",
            repo.owner = spec.owner.as_str(),
            repo.name = spec.repo.as_str(),
            branch = spec.branch.as_str(),
        );
        Some(tokio::spawn(Runner::new(path, descriptor).run().instrument(span)))
    }

    /// Runs a git operation on the blocking pool and waits for it.
    async fn blocking<T, F>(&self, spec: BranchSpec, f: F) -> Result<T, BlockingError>
    where
        F: FnOnce(&RepoSync, &BranchSpec) -> T + Send + 'static,
        T: Send + 'static,
    {
        let sync = self.sync.clone();
        web::block(move || f(&sync, &spec)).await
    }
}
