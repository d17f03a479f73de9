//! Supervises service launch sequencing and runtime orchestration.

use std::process;
use std::sync::Arc;

use arbor_config::{Config, LaunchArgs};
use tracing::info;

use crate::apps::AppCatalog;
use crate::bootstrap::{ArgsConfigLoader, Bootstrapped, ConfigLoader, bootstrap_with};
use crate::children::ChildDeps;
use crate::context::ServiceContext;
use crate::dispatch::{Dispatcher, DispatcherSettings};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::registry::HandlerRegistry;
use crate::transport::{HttpGateway, HttpListener};

use super::errors::LaunchError;
use super::guard::{HealthState, ProcessGuard};
use super::shutdown::{ShutdownSignal, StopToken, SystemShutdownSignal};
use super::{PROCESS_TARGET, SHUTDOWN_TIMEOUT};

/// Service dependencies required to construct the runtime.
pub(crate) struct ServiceDeps<L> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) catalog: Arc<AppCatalog>,
    /// Child collaborators; the system launcher and probe when absent.
    pub(crate) children: Option<ChildDeps>,
}

/// Collaborators required to launch the service runtime.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) shutdown: S,
    pub(crate) services: ServiceDeps<L>,
}

/// Runs the service described by `args` with the production collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] when startup fails or shutdown cannot complete.
pub fn run_service(args: LaunchArgs) -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        shutdown: SystemShutdownSignal,
        services: ServiceDeps {
            loader: ArgsConfigLoader::new(args),
            reporter: Arc::new(StructuredHealthReporter::new()),
            catalog: Arc::new(AppCatalog::builtin()),
            children: None,
        },
    };
    run_service_with(plan)
}

/// Runs the service with injected collaborators.
pub(crate) fn run_service_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan { shutdown, services } = plan;
    let ServiceDeps {
        loader,
        reporter,
        catalog,
        children,
    } = services;

    let result = bootstrap_with(&loader, reporter.as_ref())
        .map_err(LaunchError::from)
        .and_then(|service| serve(&service, &shutdown, &reporter, &catalog, children));
    if let Err(error) = &result {
        reporter.service_failed(error);
    }
    result
}

fn serve<S: ShutdownSignal>(
    service: &Bootstrapped,
    shutdown: &S,
    reporter: &Arc<dyn HealthReporter>,
    catalog: &Arc<AppCatalog>,
    children: Option<ChildDeps>,
) -> Result<(), LaunchError> {
    let config = service.config();
    let mut guard = ProcessGuard::acquire(service.paths())?;
    guard.write_pid(process::id())?;
    guard.write_health(HealthState::Starting)?;

    let entry = catalog.get(&config.app).ok_or_else(|| LaunchError::UnknownApp {
        app: config.app.clone(),
    })?;
    let mut registry = HandlerRegistry::new();
    (entry.install)(&mut registry);
    let routes = registry.route_table();
    let listener = HttpListener::bind(config)?;

    let children = match children {
        Some(children) => children,
        None => child_deps(config, reporter)?,
    };
    let context = ServiceContext::new(config.clone(), Arc::clone(catalog), children);
    let stop = StopToken::new();
    let (dispatcher, consumer) = Dispatcher::start(
        registry,
        context,
        DispatcherSettings::from(config),
        stop.clone(),
    )?;
    let gateway = HttpGateway::new(
        dispatcher.clone(),
        routes,
        service.paths().resources_dir(),
        stop.clone(),
    );
    let listener_handle = listener.start(Arc::new(gateway))?;
    guard.write_health(HealthState::Ready)?;
    reporter.service_ready(config);

    let reason = shutdown.wait(&stop)?;
    reporter.service_stopping(reason);
    guard.write_health(HealthState::Stopping)?;
    listener_handle.shutdown();
    listener_handle.join()?;
    dispatcher.close();
    let context = consumer.join_within(SHUTDOWN_TIMEOUT)?;
    info!(
        target: PROCESS_TARGET,
        %reason,
        children = context.topology().children().len(),
        "shutdown sequence completed"
    );
    Ok(())
}

fn child_deps(config: &Config, reporter: &Arc<dyn HealthReporter>) -> Result<ChildDeps, LaunchError> {
    ChildDeps::system(config, Arc::clone(reporter))
        .map_err(|source| LaunchError::Executable { source })
}
