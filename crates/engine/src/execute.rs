//! The Engine - single entry point for command execution.
//!
//! Every run, synchronous or asynchronous, follows one lifecycle:
//!
//! 1. permission check against the caller's effective grant; failure is
//!    reported before any lock or resource access,
//! 2. argument validation,
//! 3. open-resource check for commands that need one,
//! 4. job registration and lock acquisition,
//! 5. body execution with a cancellation/progress handle,
//! 6. guaranteed lock release on every path, panic included.
//!
//! Synchronous runs execute on the caller's thread and return a
//! [`CommandOutcome`] inline. Asynchronous submissions return a job id;
//! their outcome, success or failure, is captured into the job's result
//! cache and only surfaced when collected.

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use tracing::{info, warn};

use talus_core::{Error, Options, Result};
use talus_jobs::{JobHandle, JobId, JobPool, JobSpec};
use talus_locks::{LockManager, LockRequest};
use talus_store::AtomicUpdates;

use crate::command::{BatchOp, Command};
use crate::context::Context;
use crate::registry::{Registry, SessionId};
use crate::users::UserStore;

/// Result of one synchronous command run.
///
/// Every run produces exactly one human-readable status line. Failures
/// additionally retain the structured cause; a cooperatively stopped
/// command reports `interrupted` instead of a failure.
#[derive(Debug)]
pub struct CommandOutcome {
    /// Job id of the run; `None` if the command was rejected before a
    /// job record was created (permission or validation failure).
    pub job: Option<JobId>,
    /// Whether the command completed successfully.
    pub success: bool,
    /// Whether the command was cooperatively stopped.
    pub interrupted: bool,
    /// The status line.
    pub info: String,
    /// Structured failure cause, for programmatic inspection.
    pub cause: Option<Error>,
}

impl CommandOutcome {
    fn rejected(error: Error) -> Self {
        CommandOutcome {
            job: None,
            success: false,
            interrupted: false,
            info: error.to_string(),
            cause: Some(error),
        }
    }

    fn finished(job: JobId, outcome: Result<String>) -> Self {
        match outcome {
            Ok(info) => CommandOutcome {
                job: Some(job),
                success: true,
                interrupted: false,
                info,
                cause: None,
            },
            Err(error) if error.is_interrupted() => CommandOutcome {
                job: Some(job),
                success: false,
                interrupted: true,
                info: "command was interrupted".into(),
                cause: None,
            },
            Err(error) => CommandOutcome {
                job: Some(job),
                success: false,
                interrupted: false,
                info: error.to_string(),
                cause: Some(error),
            },
        }
    }
}

/// Immutable session state captured before execution, so asynchronous
/// bodies carry no reference to the live [`Context`].
#[derive(Debug, Clone)]
struct SessionView {
    session: SessionId,
    open: Option<String>,
}

impl SessionView {
    fn open(&self) -> Result<&str> {
        self.open.as_deref().ok_or(Error::NoResourceOpen)
    }
}

/// The shared services a command body executes against. Cloning is cheap
/// (interior `Arc`s), which is how asynchronous bodies take them along.
#[derive(Clone)]
struct Services {
    registry: Arc<Registry>,
    users: Arc<UserStore>,
    jobs: Arc<JobPool>,
    max_payload: usize,
}

/// The command execution engine.
///
/// Owns the resource registry, the lock manager, the job pool and the
/// user store, and wires them into the command lifecycle. `Engine` is
/// `Send + Sync`; front ends share one instance across sessions.
pub struct Engine {
    options: Options,
    locks: Arc<LockManager>,
    services: Services,
}

impl Engine {
    /// Creates an engine with the given options.
    pub fn new(options: Options) -> Self {
        let services = Services {
            registry: Arc::new(Registry::new(&options)),
            users: Arc::new(UserStore::new()),
            jobs: Arc::new(JobPool::new(options.workers, options.queue_capacity)),
            max_payload: options.max_payload_bytes,
        };
        Engine {
            locks: Arc::new(LockManager::new(options.parallel)),
            services,
            options,
        }
    }

    /// Creates a session context for the given user.
    pub fn context(&self, user: &str) -> Context {
        Context::new(user, self.options.clone())
    }

    /// The resource registry (pin/open surface for collaborators).
    pub fn registry(&self) -> &Registry {
        &self.services.registry
    }

    /// The user store.
    pub fn users(&self) -> &UserStore {
        &self.services.users
    }

    /// The job pool (listing/administration surface for front ends).
    pub fn jobs(&self) -> &JobPool {
        &self.services.jobs
    }

    /// The lock manager (declare-locks surface for collaborators).
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Total lock requests recorded since startup, for diagnostics.
    pub fn lock_requests(&self) -> u64 {
        self.locks.requests()
    }

    /// Shuts down the job workers, draining pending submissions.
    pub fn shutdown(&self) {
        self.services.jobs.shutdown();
    }

    /// Runs a command synchronously on the caller's thread.
    ///
    /// The run is registered as a job for visibility and cancellation
    /// like any asynchronous submission.
    pub fn run(&self, ctx: &mut Context, cmd: Command) -> CommandOutcome {
        let cmd = cmd.normalized(self.options.case_insensitive_names);
        if let Err(error) = self.precheck(ctx.user(), ctx.open_name(), &cmd) {
            warn!(command = cmd.kind(), user = ctx.user(), %error, "command rejected");
            return CommandOutcome::rejected(error);
        }
        let request = cmd.locks(ctx.open_name());
        let spec = self.job_spec(&cmd, ctx.user(), &request);
        let (id, outcome) = self.services.jobs.run_sync(spec, |handle| {
            let _guard = self.locks.acquire(request);
            self.execute_sync(ctx, &cmd, handle)
        });
        match &outcome {
            Ok(status) => info!(command = cmd.kind(), %id, %status, "command finished"),
            Err(error) => warn!(command = cmd.kind(), %id, %error, "command failed"),
        }
        CommandOutcome::finished(id, outcome)
    }

    /// Schedules a command on the worker pool and returns its job id.
    ///
    /// Session-mutating commands (`Open`, `Close`) are synchronous by
    /// nature and rejected here. The outcome is cached under the job id
    /// until collected via [`Command::JobResult`] or evicted by a stop.
    pub fn submit(&self, ctx: &Context, cmd: Command) -> Result<JobId> {
        let cmd = cmd.normalized(self.options.case_insensitive_names);
        if matches!(cmd, Command::Open { .. } | Command::Close) {
            return Err(Error::Validation {
                reason: format!("{} cannot run asynchronously", cmd.kind()),
            });
        }
        self.precheck(ctx.user(), ctx.open_name(), &cmd)?;
        let request = cmd.locks(ctx.open_name());
        let spec = self.job_spec(&cmd, ctx.user(), &request);
        let view = SessionView {
            session: ctx.session(),
            open: ctx.open_name().map(String::from),
        };
        let services = self.services.clone();
        let locks = Arc::clone(&self.locks);
        self.services.jobs.submit(spec, move |handle| {
            let _guard = locks.acquire(request);
            services.execute(&view, &cmd, handle)
        })
    }

    fn precheck(&self, user: &str, open: Option<&str>, cmd: &Command) -> Result<()> {
        let required = cmd.required_perm();
        let effective = self
            .services
            .users
            .effective(user, cmd.perm_resource(open));
        if effective < required {
            return Err(Error::PermissionDenied { required });
        }
        cmd.validate()?;
        if cmd.needs_open() && open.is_none() {
            return Err(Error::NoResourceOpen);
        }
        Ok(())
    }

    fn job_spec(&self, cmd: &Command, user: &str, request: &LockRequest) -> JobSpec {
        JobSpec {
            kind: cmd.kind().into(),
            user: user.into(),
            reads: request.read().to_string(),
            writes: request.write().to_string(),
            stoppable: cmd.stoppable(),
        }
    }

    /// Synchronous execution: session-mutating commands are handled here,
    /// everything else runs against the captured view.
    fn execute_sync(&self, ctx: &mut Context, cmd: &Command, handle: &JobHandle) -> Result<String> {
        match cmd {
            Command::Open { name } => {
                let pin = Registry::pin(&self.services.registry, name, ctx.session())?;
                let previous = ctx.clear_open();
                ctx.set_open(name.clone(), pin);
                Ok(match previous {
                    Some(previous) => format!("closed {previous} and opened {name}"),
                    None => format!("opened {name}"),
                })
            }
            Command::Close => Ok(match ctx.clear_open() {
                Some(name) => format!("closed {name}"),
                None => "no resource was open".into(),
            }),
            // A destructive command targeting the session's own open
            // resource closes that reference first; any pin that still
            // blocks it afterwards belongs to another session.
            Command::DropDb { name }
            | Command::RenameDb { from: name, .. }
            | Command::Restore { name } => {
                if ctx.open_name() == Some(name.as_str()) {
                    ctx.clear_open();
                }
                let view = SessionView {
                    session: ctx.session(),
                    open: ctx.open_name().map(String::from),
                };
                self.services.execute(&view, cmd, handle)
            }
            _ => {
                let view = SessionView {
                    session: ctx.session(),
                    open: ctx.open_name().map(String::from),
                };
                self.services.execute(&view, cmd, handle)
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Drain the pool so queued bodies (which hold service handles)
        // are released and worker threads exit.
        self.services.jobs.shutdown();
    }
}

impl Services {
    fn execute(&self, view: &SessionView, cmd: &Command, handle: &JobHandle) -> Result<String> {
        match cmd {
            Command::CreateDb { name, payloads } => {
                self.registry.create(name, payloads.clone())?;
                Ok(format!("created {name} with {} nodes", payloads.len()))
            }
            Command::DropDb { name } => {
                self.registry.drop_resource(name)?;
                Ok(format!("dropped {name}"))
            }
            Command::RenameDb { from, to } => {
                self.registry.rename(from, to)?;
                Ok(format!("renamed {from} to {to}"))
            }
            Command::CopyDb { from, to } => {
                if self.registry.exists(to) {
                    return Err(Error::ResourceExists { name: to.clone() });
                }
                let source = self.registry.resource(from)?;
                let snapshot = source.lock().snapshot();
                let total = snapshot.len().max(1);
                let mut copied = Vec::with_capacity(snapshot.len());
                for (done, payload) in snapshot.into_iter().enumerate() {
                    handle.checkpoint()?;
                    copied.push(payload);
                    handle.set_progress((done + 1) as f64 / total as f64);
                }
                self.registry.create(to, copied)?;
                Ok(format!("copied {from} to {to}"))
            }
            Command::ListDbs => {
                let names = self.registry.names();
                Ok(if names.is_empty() {
                    "no resources".into()
                } else {
                    format!("{} resources: {}", names.len(), names.join(", "))
                })
            }
            Command::InfoDb => {
                let name = view.open()?;
                let resource = self.registry.resource(name)?;
                let mut resource = resource.lock();
                let stats = resource.stats();
                let dirty = if resource.is_dirty() {
                    ", needs consistency check"
                } else {
                    ""
                };
                Ok(format!(
                    "{name}: {} nodes, {} bytes{dirty}",
                    stats.node_count, stats.payload_bytes
                ))
            }
            Command::Add { payload } => {
                let name = view.open()?;
                let resource = self.registry.resource(name)?;
                let mut resource = resource.lock();
                let mut updates = AtomicUpdates::new(self.max_payload);
                updates.add_insert(resource.len(), payload.clone())?;
                updates.execute(&mut resource, false)?;
                Ok(format!("added 1 node to {name}"))
            }
            Command::Insert { position, payload } => {
                let name = view.open()?;
                let resource = self.registry.resource(name)?;
                let mut resource = resource.lock();
                let mut updates = AtomicUpdates::new(self.max_payload);
                updates.add_insert(*position, payload.clone())?;
                updates.execute(&mut resource, false)?;
                Ok(format!("inserted 1 node into {name} at position {position}"))
            }
            Command::Delete { position } => {
                let name = view.open()?;
                let resource = self.registry.resource(name)?;
                let mut resource = resource.lock();
                let mut updates = AtomicUpdates::new(self.max_payload);
                updates.add_delete(*position)?;
                updates.execute(&mut resource, false)?;
                Ok(format!("deleted 1 node from {name} at position {position}"))
            }
            Command::Replace { position, payload } => {
                let name = view.open()?;
                let resource = self.registry.resource(name)?;
                let mut resource = resource.lock();
                let mut updates = AtomicUpdates::new(self.max_payload);
                updates.add_replace(*position, payload.clone())?;
                updates.execute(&mut resource, false)?;
                Ok(format!("replaced 1 node in {name} at position {position}"))
            }
            Command::Batch { ops, optimize } => {
                let name = view.open()?;
                let resource = self.registry.resource(name)?;
                let mut resource = resource.lock();
                let mut updates = AtomicUpdates::new(self.max_payload);
                for op in ops {
                    handle.checkpoint()?;
                    match op {
                        BatchOp::Insert { position, payload } => {
                            updates.add_insert(*position, payload.clone())?
                        }
                        BatchOp::Delete { position } => updates.add_delete(*position)?,
                        BatchOp::Replace { position, payload } => {
                            updates.add_replace(*position, payload.clone())?
                        }
                    }
                }
                let applied = updates.execute(&mut resource, *optimize)?;
                Ok(format!("applied {applied} updates to {name}"))
            }
            Command::Export { path } => {
                let name = view.open()?;
                let resource = self.registry.resource(name)?;
                let snapshot = resource.lock().snapshot();
                let total = snapshot.len().max(1);
                let mut payloads = Vec::with_capacity(snapshot.len());
                for (done, payload) in snapshot.into_iter().enumerate() {
                    handle.checkpoint()?;
                    payloads.push(payload);
                    handle.set_progress((done + 1) as f64 / total as f64);
                }
                let file = File::create(path)?;
                serde_json::to_writer_pretty(BufWriter::new(file), &payloads)
                    .map_err(|e| Error::Io {
                        reason: e.to_string(),
                    })?;
                Ok(format!(
                    "exported {} nodes from {name} to {path}",
                    payloads.len()
                ))
            }
            Command::CreateBackup { name } => {
                let nodes = self.registry.backup(name, view.session)?;
                Ok(format!("backed up {name} ({nodes} nodes)"))
            }
            Command::Restore { name } => {
                let nodes = self.registry.restore(name)?;
                Ok(format!("restored {name} ({nodes} nodes)"))
            }
            Command::Stats { pattern } => {
                let names = self.registry.names_matching(pattern);
                let total = names.len().max(1);
                let mut nodes = 0;
                let mut bytes = 0;
                for (done, name) in names.iter().enumerate() {
                    handle.checkpoint()?;
                    let stats = self.registry.stats(name)?;
                    nodes += stats.node_count;
                    bytes += stats.payload_bytes;
                    handle.set_progress((done + 1) as f64 / total as f64);
                }
                // Narrow the reported lock set to what was actually read;
                // the global grant taken up front stays in force.
                self.jobs
                    .narrow_observed(handle.id(), names.join(","), String::new());
                Ok(format!(
                    "{} resources match {pattern}: {nodes} nodes, {bytes} bytes",
                    names.len()
                ))
            }
            Command::CreateUser { name, perm } => {
                self.users.create(name, *perm)?;
                Ok(format!("created user {name}"))
            }
            Command::DropUser { name } => {
                self.users.drop_user(name)?;
                Ok(format!("dropped user {name}"))
            }
            Command::Grant {
                user,
                perm,
                resource,
            } => {
                self.users.grant(user, *perm, resource.as_deref())?;
                Ok(match resource {
                    Some(resource) => format!("granted {perm} on {resource} to {user}"),
                    None => format!("granted {perm} to {user}"),
                })
            }
            Command::ShowJobs => {
                let ids = self.jobs.list();
                if ids.is_empty() {
                    return Ok("no jobs".into());
                }
                let lines: Vec<String> = ids
                    .iter()
                    .filter_map(|id| self.jobs.describe(*id))
                    .map(|info| {
                        format!("{} {} {} ({})", info.id, info.state, info.kind, info.user)
                    })
                    .collect();
                Ok(lines.join("; "))
            }
            Command::StopJob { id } => {
                let id: JobId = id.parse()?;
                Ok(if self.jobs.stop(id) {
                    format!("{id} stopped")
                } else {
                    format!("{id} was not stopped")
                })
            }
            Command::JobResult { id } => {
                let id: JobId = id.parse()?;
                self.jobs.collect(id)
            }
            // Session commands are handled on the synchronous path.
            Command::Open { .. } | Command::Close => Err(Error::Validation {
                reason: format!("{} cannot run asynchronously", cmd.kind()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talus_core::Permission;
    use talus_jobs::JobState;
    use std::time::Duration;

    fn engine() -> Engine {
        Engine::new(Options {
            workers: 1,
            ..Options::default()
        })
    }

    /// An engine whose workers never start, so submitted jobs stay queued.
    fn engine_without_workers() -> Engine {
        Engine::new(Options {
            workers: 0,
            ..Options::default()
        })
    }

    fn wait_for_state(engine: &Engine, id: JobId, state: JobState) -> bool {
        for _ in 0..400 {
            if engine.jobs().describe(id).map(|info| info.state) == Some(state) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn seed(engine: &Engine, name: &str, nodes: usize) {
        let mut ctx = engine.context("admin");
        let outcome = engine.run(
            &mut ctx,
            Command::CreateDb {
                name: name.into(),
                payloads: (0..nodes).map(|i| format!("n{i}")).collect(),
            },
        );
        assert!(outcome.success, "{}", outcome.info);
    }

    #[test]
    fn test_create_open_add_info_flow() {
        let engine = engine();
        let mut ctx = engine.context("admin");

        let outcome = engine.run(
            &mut ctx,
            Command::CreateDb {
                name: "docs".into(),
                payloads: vec!["a".into(), "b".into()],
            },
        );
        assert!(outcome.success);
        assert!(outcome.job.is_some());

        let outcome = engine.run(&mut ctx, Command::Open { name: "docs".into() });
        assert!(outcome.success);
        assert_eq!(ctx.open_name(), Some("docs"));
        assert_eq!(engine.registry().pin_count("docs"), 1);

        let outcome = engine.run(&mut ctx, Command::Add { payload: "c".into() });
        assert!(outcome.success);

        let outcome = engine.run(&mut ctx, Command::InfoDb);
        assert!(outcome.success);
        assert!(outcome.info.contains("3 nodes"), "{}", outcome.info);
    }

    #[test]
    fn test_permission_failure_touches_nothing() {
        let engine = engine();
        engine.users().create("erin", Permission::Read).unwrap();
        seed(&engine, "docs", 1);
        let requests_before = engine.lock_requests();

        let mut ctx = engine.context("erin");
        let outcome = engine.run(&mut ctx, Command::DropDb { name: "docs".into() });

        assert!(!outcome.success);
        assert_eq!(
            outcome.cause,
            Some(Error::PermissionDenied {
                required: Permission::Create
            })
        );
        // Rejected before execution: no job record, no lock request, no
        // pin table change, resource untouched.
        assert!(outcome.job.is_none());
        assert_eq!(engine.lock_requests(), requests_before);
        assert_eq!(engine.registry().pin_count("docs"), 0);
        assert!(engine.registry().exists("docs"));
    }

    #[test]
    fn test_unknown_user_has_no_permission() {
        let engine = engine();
        let mut ctx = engine.context("ghost");
        let outcome = engine.run(&mut ctx, Command::Open { name: "docs".into() });
        assert!(matches!(
            outcome.cause,
            Some(Error::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_validation_failure_before_locks() {
        let engine = engine();
        let requests_before = engine.lock_requests();
        let mut ctx = engine.context("admin");
        let outcome = engine.run(
            &mut ctx,
            Command::CreateDb {
                name: "bad/name".into(),
                payloads: vec![],
            },
        );
        assert!(!outcome.success);
        assert!(matches!(outcome.cause, Some(Error::Validation { .. })));
        assert_eq!(engine.lock_requests(), requests_before);
    }

    #[test]
    fn test_needs_open_resource() {
        let engine = engine();
        let mut ctx = engine.context("admin");
        let outcome = engine.run(&mut ctx, Command::Add { payload: "x".into() });
        assert_eq!(outcome.cause, Some(Error::NoResourceOpen));
        assert!(outcome.job.is_none());
    }

    #[test]
    fn test_close_without_open_succeeds() {
        let engine = engine();
        let mut ctx = engine.context("admin");
        let outcome = engine.run(&mut ctx, Command::Close);
        assert!(outcome.success);
        assert_eq!(outcome.info, "no resource was open");
    }

    #[test]
    fn test_batch_applies_atomically() {
        let engine = engine();
        seed(&engine, "docs", 12);
        let mut ctx = engine.context("admin");
        engine.run(&mut ctx, Command::Open { name: "docs".into() });

        let outcome = engine.run(
            &mut ctx,
            Command::Batch {
                ops: vec![
                    BatchOp::Delete { position: 10 },
                    BatchOp::Delete { position: 3 },
                    BatchOp::Insert {
                        position: 3,
                        payload: "X".into(),
                    },
                ],
                optimize: false,
            },
        );
        assert!(outcome.success, "{}", outcome.info);

        let resource = engine.registry().resource("docs").unwrap();
        let resource = resource.lock();
        assert_eq!(resource.len(), 11);
        assert_eq!(resource.node(3).unwrap().payload, "X");
    }

    #[test]
    fn test_batch_validation_leaves_resource_unchanged() {
        let engine = engine();
        seed(&engine, "docs", 5);
        let mut ctx = engine.context("admin");
        engine.run(&mut ctx, Command::Open { name: "docs".into() });

        // Two destructive updates at one position: rejected while
        // buffering, before anything is applied.
        let outcome = engine.run(
            &mut ctx,
            Command::Batch {
                ops: vec![
                    BatchOp::Delete { position: 2 },
                    BatchOp::Replace {
                        position: 2,
                        payload: "x".into(),
                    },
                ],
                optimize: false,
            },
        );
        assert!(matches!(
            outcome.cause,
            Some(Error::ConflictingUpdates { position: 2 })
        ));
        assert_eq!(
            engine.registry().stats("docs").unwrap().node_count,
            5
        );
    }

    #[test]
    fn test_drop_closes_own_reference_first() {
        let engine = engine();
        seed(&engine, "docs", 2);
        let mut ctx = engine.context("admin");
        engine.run(&mut ctx, Command::Open { name: "docs".into() });
        assert_eq!(engine.registry().pin_count("docs"), 1);

        let outcome = engine.run(&mut ctx, Command::DropDb { name: "docs".into() });
        assert!(outcome.success, "{}", outcome.info);
        assert_eq!(ctx.open_name(), None);
        assert!(!engine.registry().exists("docs"));
    }

    #[test]
    fn test_drop_refused_while_pinned_by_other_session() {
        let engine = engine();
        seed(&engine, "docs", 2);

        let mut other = engine.context("admin");
        engine.run(&mut other, Command::Open { name: "docs".into() });

        let mut ctx = engine.context("admin");
        let outcome = engine.run(&mut ctx, Command::DropDb { name: "docs".into() });
        assert_eq!(
            outcome.cause,
            Some(Error::ResourceInUse { name: "docs".into() })
        );
        // Resource unchanged, other session still open.
        assert!(engine.registry().exists("docs"));
        assert_eq!(other.open_name(), Some("docs"));
        assert_eq!(engine.registry().pin_count("docs"), 1);
    }

    #[test]
    fn test_rename_and_copy() {
        let engine = engine();
        seed(&engine, "docs", 3);
        let mut ctx = engine.context("admin");

        let outcome = engine.run(
            &mut ctx,
            Command::CopyDb {
                from: "docs".into(),
                to: "copy".into(),
            },
        );
        assert!(outcome.success);
        assert_eq!(engine.registry().stats("copy").unwrap().node_count, 3);

        let outcome = engine.run(
            &mut ctx,
            Command::CopyDb {
                from: "docs".into(),
                to: "copy".into(),
            },
        );
        assert_eq!(
            outcome.cause,
            Some(Error::ResourceExists { name: "copy".into() })
        );

        let outcome = engine.run(
            &mut ctx,
            Command::RenameDb {
                from: "docs".into(),
                to: "archive".into(),
            },
        );
        assert!(outcome.success);
        assert!(engine.registry().exists("archive"));
        assert!(!engine.registry().exists("docs"));
    }

    #[test]
    fn test_backup_and_restore_round_trip() {
        let engine = engine();
        seed(&engine, "docs", 3);
        let mut ctx = engine.context("admin");

        let outcome = engine.run(&mut ctx, Command::CreateBackup { name: "docs".into() });
        assert!(outcome.success, "{}", outcome.info);

        engine.run(&mut ctx, Command::Open { name: "docs".into() });
        engine.run(&mut ctx, Command::Delete { position: 0 });
        engine.run(&mut ctx, Command::Close);
        assert_eq!(engine.registry().stats("docs").unwrap().node_count, 2);

        let outcome = engine.run(&mut ctx, Command::Restore { name: "docs".into() });
        assert!(outcome.success, "{}", outcome.info);
        assert_eq!(engine.registry().stats("docs").unwrap().node_count, 3);
    }

    #[test]
    fn test_restore_closes_own_reference_but_respects_foreign_pins() {
        let engine = engine();
        seed(&engine, "docs", 2);
        let mut ctx = engine.context("admin");
        engine.run(&mut ctx, Command::CreateBackup { name: "docs".into() });

        let mut other = engine.context("admin");
        engine.run(&mut other, Command::Open { name: "docs".into() });

        engine.run(&mut ctx, Command::Open { name: "docs".into() });
        let outcome = engine.run(&mut ctx, Command::Restore { name: "docs".into() });
        // The session's own reference was closed, the other session's pin
        // still blocks the restore.
        assert_eq!(ctx.open_name(), None);
        assert_eq!(
            outcome.cause,
            Some(Error::ResourceInUse { name: "docs".into() })
        );
    }

    #[test]
    fn test_export_writes_json() {
        let engine = engine();
        seed(&engine, "docs", 3);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.json");

        let mut ctx = engine.context("admin");
        engine.run(&mut ctx, Command::Open { name: "docs".into() });
        let outcome = engine.run(
            &mut ctx,
            Command::Export {
                path: path.to_string_lossy().into_owned(),
            },
        );
        assert!(outcome.success, "{}", outcome.info);

        let exported: Vec<String> =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(exported, vec!["n0", "n1", "n2"]);
    }

    #[test]
    fn test_stats_narrows_reported_lock_set() {
        let engine = engine();
        seed(&engine, "docs", 2);
        seed(&engine, "docs2", 3);
        seed(&engine, "logs", 1);

        let mut ctx = engine.context("admin");
        let outcome = engine.run(&mut ctx, Command::Stats { pattern: "docs*".into() });
        assert!(outcome.success);
        assert!(outcome.info.contains("2 resources"), "{}", outcome.info);
        assert!(outcome.info.contains("5 nodes"), "{}", outcome.info);

        // Declared globally, reported narrowed.
        let info = engine.jobs().describe(outcome.job.unwrap()).unwrap();
        assert_eq!(info.reads, "docs,docs2");
    }

    #[test]
    fn test_async_submit_and_collect_via_job_result() {
        let engine = engine();
        seed(&engine, "docs", 4);

        let ctx = engine.context("admin");
        let id = engine
            .submit(&ctx, Command::Stats { pattern: "*".into() })
            .unwrap();
        assert!(wait_for_state(&engine, id, JobState::Cached));

        let mut admin = engine.context("admin");
        let outcome = engine.run(&mut admin, Command::JobResult { id: id.to_string() });
        assert!(outcome.success);
        assert!(outcome.info.contains("4 nodes"), "{}", outcome.info);

        // At-most-once delivery.
        let outcome = engine.run(&mut admin, Command::JobResult { id: id.to_string() });
        assert_eq!(
            outcome.cause,
            Some(Error::JobNotFound { id: id.to_string() })
        );
    }

    #[test]
    fn test_async_failure_is_captured_not_thrown() {
        let engine = engine();
        let ctx = engine.context("admin");
        let id = engine
            .submit(&ctx, Command::DropDb { name: "ghost".into() })
            .unwrap();
        assert!(wait_for_state(&engine, id, JobState::Cached));

        let mut admin = engine.context("admin");
        let outcome = engine.run(&mut admin, Command::JobResult { id: id.to_string() });
        assert_eq!(
            outcome.cause,
            Some(Error::ResourceNotFound { name: "ghost".into() })
        );
    }

    #[test]
    fn test_stop_queued_job_via_command() {
        let engine = engine_without_workers();
        seed(&engine, "docs", 1);

        let ctx = engine.context("admin");
        let id = engine
            .submit(&ctx, Command::Stats { pattern: "*".into() })
            .unwrap();
        assert_eq!(
            engine.jobs().describe(id).unwrap().state,
            JobState::Queued
        );

        let mut admin = engine.context("admin");
        let outcome = engine.run(&mut admin, Command::StopJob { id: id.to_string() });
        assert!(outcome.success);
        assert!(outcome.info.contains("stopped"), "{}", outcome.info);
        assert_eq!(
            engine.jobs().describe(id).unwrap().state,
            JobState::Cancelled
        );

        // Stopping again reports that nothing was stopped; no error.
        let outcome = engine.run(&mut admin, Command::StopJob { id: id.to_string() });
        assert!(outcome.success);
        assert!(outcome.info.contains("not stopped"), "{}", outcome.info);
    }

    #[test]
    fn test_open_close_cannot_run_asynchronously() {
        let engine = engine();
        seed(&engine, "docs", 1);
        let ctx = engine.context("admin");
        assert!(matches!(
            engine.submit(&ctx, Command::Open { name: "docs".into() }),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            engine.submit(&ctx, Command::Close),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_jobs_surface_requires_admin() {
        let engine = engine();
        engine.users().create("erin", Permission::Write).unwrap();
        let mut ctx = engine.context("erin");
        let outcome = engine.run(&mut ctx, Command::ShowJobs);
        assert_eq!(
            outcome.cause,
            Some(Error::PermissionDenied {
                required: Permission::Admin
            })
        );
    }

    #[test]
    fn test_local_grant_gates_content_commands() {
        let engine = engine();
        seed(&engine, "docs", 1);
        engine.users().create("erin", Permission::Read).unwrap();

        let mut ctx = engine.context("erin");
        let outcome = engine.run(&mut ctx, Command::Open { name: "docs".into() });
        assert!(outcome.success);

        let outcome = engine.run(&mut ctx, Command::Add { payload: "x".into() });
        assert_eq!(
            outcome.cause,
            Some(Error::PermissionDenied {
                required: Permission::Write
            })
        );

        // Grant write on docs only; the add now passes.
        let mut admin = engine.context("admin");
        let outcome = engine.run(
            &mut admin,
            Command::Grant {
                user: "erin".into(),
                perm: Permission::Write,
                resource: Some("docs".into()),
            },
        );
        assert!(outcome.success);

        let outcome = engine.run(&mut ctx, Command::Add { payload: "x".into() });
        assert!(outcome.success, "{}", outcome.info);
    }

    #[test]
    fn test_case_insensitive_names() {
        let engine = Engine::new(Options {
            case_insensitive_names: true,
            workers: 1,
            ..Options::default()
        });
        let mut ctx = engine.context("admin");
        let outcome = engine.run(
            &mut ctx,
            Command::CreateDb {
                name: "Docs".into(),
                payloads: vec![],
            },
        );
        assert!(outcome.success);
        assert!(engine.registry().exists("docs"));

        let outcome = engine.run(&mut ctx, Command::Open { name: "DOCS".into() });
        assert!(outcome.success);
        assert_eq!(ctx.open_name(), Some("docs"));
    }

    #[test]
    fn test_show_jobs_lists_live_jobs() {
        let engine = engine_without_workers();
        seed(&engine, "docs", 1);
        let ctx = engine.context("admin");
        let id = engine
            .submit(&ctx, Command::Stats { pattern: "*".into() })
            .unwrap();

        let mut admin = engine.context("admin");
        let outcome = engine.run(&mut admin, Command::ShowJobs);
        assert!(outcome.success);
        assert!(outcome.info.contains(&id.to_string()), "{}", outcome.info);
        assert!(outcome.info.contains("queued"), "{}", outcome.info);
    }
}
