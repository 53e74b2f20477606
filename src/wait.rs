//! Readiness waiter
//!
//! Polls each selected component until its check passes or its deadline runs
//! out. Components are waited for one after another in canonical order, each
//! with a fresh deadline and backoff schedule. Once a component has been
//! waited on for the watchdog's minimum log check time, failed polls also
//! give the watchdog a chance to report known problems and slow the loop
//! down. Node commands run on the blocking pool under a deadline, so a hung
//! command cannot stall the loop past its own deadline.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::agent::{kubelet_status, KUBELET_SERVICE};
use crate::backoff::{Backoff, BackoffConfig};
use crate::cluster::ClusterApi;
use crate::command::{run_blocking, CommandRunner};
use crate::components::{should_wait, Component, ComponentSet};
use crate::config::WaitConfig;
use crate::pods::expected_components_running;
use crate::watchdog::Watchdog;
use crate::{Error, DEFAULT_NAMESPACE, DEFAULT_SERVICE_ACCOUNT};

/// Waits for cluster components to become ready
pub struct ReadinessWaiter {
    api: Arc<dyn ClusterApi>,
    runner: Arc<dyn CommandRunner>,
    watchdog: Watchdog,
    config: WaitConfig,
}

impl ReadinessWaiter {
    /// Create a waiter
    pub fn new(
        api: Arc<dyn ClusterApi>,
        runner: Arc<dyn CommandRunner>,
        watchdog: Watchdog,
        config: WaitConfig,
    ) -> Self {
        Self {
            api,
            runner,
            watchdog,
            config,
        }
    }

    /// Wait for every component enabled in `components`
    ///
    /// Stops at the first component that fails for good or times out.
    pub async fn wait_for(&self, components: &ComponentSet) -> Result<(), Error> {
        if !should_wait(components) {
            info!("skip waiting for components based on config");
            return Ok(());
        }

        let start = Instant::now();
        info!(components = %components, "waiting for components");
        for component in components.enabled() {
            self.wait_for_component(component).await?;
        }
        info!(
            components = %components,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "cluster components ready"
        );
        Ok(())
    }

    /// Poll one component until it is ready or its deadline passes
    pub async fn wait_for_component(&self, component: Component) -> Result<(), Error> {
        let timeout = self.config.timeout();
        let mut backoff = Backoff::new(BackoffConfig::from(&self.config));
        let start = Instant::now();

        info!(component = %component.key(), timeout_secs = timeout.as_secs(), "waiting for component");
        loop {
            let err = match self.check(component).await {
                Ok(()) => {
                    info!(
                        component = %component.key(),
                        attempts = backoff.attempt() + 1,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "component ready"
                    );
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };
            debug!(component = %component.key(), error = %err, "component not ready yet");

            if start.elapsed() >= self.watchdog.throttle().min_log_check() {
                self.watchdog.check_and_throttle(self.runner.clone()).await;
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(Error::Timeout {
                    component: component.key().to_string(),
                    waited: elapsed,
                    last_error: err.to_string(),
                });
            }

            let delay = backoff.next_delay().min(timeout - elapsed);
            tokio::time::sleep(delay).await;
        }
    }

    /// Run the readiness check for `component` once
    pub async fn check(&self, component: Component) -> Result<(), Error> {
        match component {
            Component::ApiServer => {
                let runner = self.runner.clone();
                let probe = run_blocking(
                    format!("{} status", KUBELET_SERVICE),
                    self.config.command_timeout(),
                    move || kubelet_status(runner.as_ref()),
                )
                .await?;
                if !probe.is_running() {
                    return Err(Error::AgentNotRunning { state: probe.state });
                }
                let version = self.api.server_version().await?;
                debug!(version = %version, "apiserver answered");
                Ok(())
            }
            Component::SystemPods => expected_components_running(self.api.as_ref()).await,
            Component::DefaultServiceAccount => {
                if self
                    .api
                    .service_account_exists(DEFAULT_NAMESPACE, DEFAULT_SERVICE_ACCOUNT)
                    .await?
                {
                    Ok(())
                } else {
                    Err(Error::ServiceAccountMissing {
                        namespace: DEFAULT_NAMESPACE.to_string(),
                        name: DEFAULT_SERVICE_ACCOUNT.to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use mockall::Sequence;

    use crate::agent::AgentState;
    use crate::cluster::MockClusterApi;
    use crate::command::{CommandOutput, MockCommandRunner};
    use crate::config::ThrottleConfig;
    use crate::pods::testing::{healthy_pods, pod};
    use crate::watchdog::testing::{watchdog, StaticFinder};
    use crate::watchdog::{Problem, ProblemSource};

    fn config(timeout_secs: u64) -> WaitConfig {
        WaitConfig {
            timeout_secs,
            poll_interval_ms: 500,
            max_poll_interval_ms: 1000,
            ..Default::default()
        }
    }

    fn waiter(
        api: MockClusterApi,
        runner: MockCommandRunner,
        finder: Arc<StaticFinder>,
        config: WaitConfig,
    ) -> ReadinessWaiter {
        waiter_with_throttle(api, runner, finder, config, ThrottleConfig::default())
    }

    fn waiter_with_throttle(
        api: MockClusterApi,
        runner: MockCommandRunner,
        finder: Arc<StaticFinder>,
        config: WaitConfig,
        throttle: ThrottleConfig,
    ) -> ReadinessWaiter {
        ReadinessWaiter::new(
            Arc::new(api),
            Arc::new(runner),
            watchdog(finder, throttle),
            config,
        )
    }

    fn problem() -> Vec<Problem> {
        vec![Problem::new(
            ProblemSource::Bootstrapper,
            "failed to run Kubelet",
        )]
    }

    /// Empty kube-system on the first poll, healthy afterwards
    fn ready_on_second_poll() -> (MockClusterApi, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut api = MockClusterApi::new();
        api.expect_list_pods().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Vec::new())
            } else {
                Ok(healthy_pods())
            }
        });
        (api, calls)
    }

    fn kubelet_active() -> MockCommandRunner {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run_cmd()
            .returning(|_| Ok(CommandOutput::success("active\n")));
        runner
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_selected_touches_nothing() {
        let finder = StaticFinder::new(Vec::new());
        let w = waiter(
            MockClusterApi::new(),
            MockCommandRunner::new(),
            finder.clone(),
            config(5),
        );

        w.wait_for(&ComponentSet::none()).await.unwrap();
        assert_eq!(finder.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_cluster_checks_components_in_order() {
        let mut seq = Sequence::new();
        let mut runner = MockCommandRunner::new();
        let mut api = MockClusterApi::new();

        runner
            .expect_run_cmd()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::success("active")));
        api.expect_server_version()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok("v1.32.0".to_string()));
        api.expect_list_pods()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(healthy_pods()));
        api.expect_service_account_exists()
            .withf(|ns, name| ns == "default" && name == "default")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(true));

        let finder = StaticFinder::new(Vec::new());
        let w = waiter(api, runner, finder.clone(), config(5));

        let start = Instant::now();
        w.wait_for(&ComponentSet::all()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(finder.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn system_pods_ready_after_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut api = MockClusterApi::new();
        api.expect_list_pods().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(vec![pod("etcd-node", "Pending", &[("component", "etcd")])])
            } else {
                Ok(healthy_pods())
            }
        });

        let finder = StaticFinder::new(Vec::new());
        let w = waiter(api, MockCommandRunner::new(), finder.clone(), config(60));

        w.wait_for_component(Component::SystemPods).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // both misses happen well inside the minimum log check time
        assert_eq!(finder.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_component_times_out_with_last_error() {
        let mut api = MockClusterApi::new();
        api.expect_list_pods().returning(|_| Ok(Vec::new()));

        let w = waiter(
            api,
            MockCommandRunner::new(),
            StaticFinder::new(Vec::new()),
            config(5),
        );

        let err = w
            .wait_for(&ComponentSet::from_flags([("system_pods", true)]))
            .await
            .unwrap_err();
        match err {
            Error::Timeout {
                component,
                waited,
                last_error,
            } => {
                assert_eq!(component, "system_pods");
                assert!(waited >= Duration::from_secs(5), "{:?}", waited);
                assert!(waited < Duration::from_secs(7), "{:?}", waited);
                assert!(last_error.starts_with("missing components: kube-dns"));
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_problems_slow_the_loop() {
        let (api, _) = ready_on_second_poll();
        let finder = StaticFinder::new(problem());
        let throttle = ThrottleConfig {
            min_log_check_secs: 0,
            ..Default::default()
        };
        let w = waiter_with_throttle(
            api,
            MockCommandRunner::new(),
            finder.clone(),
            config(60),
            throttle,
        );

        let start = Instant::now();
        w.wait_for_component(Component::SystemPods).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(7500));
        assert_eq!(finder.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn early_misses_skip_the_watchdog() {
        let (api, calls) = ready_on_second_poll();
        let finder = StaticFinder::new(problem());
        let w = waiter(api, MockCommandRunner::new(), finder.clone(), config(60));

        let start = Instant::now();
        w.wait_for_component(Component::SystemPods).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(finder.calls(), 0);
        assert!(start.elapsed() < Duration::from_secs(1), "{:?}", start.elapsed());
    }

    /// A fresh node logs "network not ready" until the CNI is up
    #[tokio::test(start_paused = true)]
    async fn bootstrap_noise_does_not_delay_a_fresh_cluster() {
        use crate::problems::{Crictl, Kubeadm, LogProblemFinder};
        use crate::watchdog::Watchdog;

        let (api, calls) = ready_on_second_poll();
        let mut runner = MockCommandRunner::new();
        runner.expect_run_cmd().returning(|cmd| {
            if cmd.iter().any(|a| a == "journalctl") {
                Ok(CommandOutput::success(
                    "kubelet[1]: E0101 \"Container runtime network not ready\"\n",
                ))
            } else {
                Ok(CommandOutput::success(""))
            }
        });
        let config = config(60);
        let dog = Watchdog::new(
            Arc::new(LogProblemFinder::default()),
            Arc::new(Crictl::new()),
            Arc::new(Kubeadm),
            config.cluster.clone(),
            config.throttle.clone(),
        );
        let w = ReadinessWaiter::new(Arc::new(api), Arc::new(runner), dog, config);

        let start = Instant::now();
        w.wait_for_component(Component::SystemPods).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() < Duration::from_secs(1), "{:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_joins_once_the_wait_drags_on() {
        let ready_at = Instant::now() + Duration::from_secs(70);
        let mut api = MockClusterApi::new();
        api.expect_list_pods().returning(move |_| {
            if Instant::now() < ready_at {
                Ok(Vec::new())
            } else {
                Ok(healthy_pods())
            }
        });
        let finder = StaticFinder::new(problem());
        let w = waiter(api, MockCommandRunner::new(), finder.clone(), config(120));

        let start = Instant::now();
        w.wait_for_component(Component::SystemPods).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(70));
        assert!(finder.calls() >= 1);
    }

    /// Runs on the real clock: the runner blocks a real thread
    #[tokio::test]
    async fn hung_kubelet_probe_still_times_out() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run_cmd().returning(|_| {
            std::thread::sleep(Duration::from_millis(400));
            Ok(CommandOutput::success("active"))
        });
        let config = WaitConfig {
            command_timeout_ms: 50,
            ..config(1)
        };
        let w = waiter(
            MockClusterApi::new(),
            runner,
            StaticFinder::new(Vec::new()),
            config,
        );

        let start = std::time::Instant::now();
        let err = w
            .wait_for_component(Component::ApiServer)
            .await
            .unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(3), "{:?}", start.elapsed());
        match err {
            Error::Timeout {
                component,
                last_error,
                ..
            } => {
                assert_eq!(component, "apiserver");
                assert!(last_error.contains("did not finish"), "{}", last_error);
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_abort_without_polling_again() {
        let mut api = MockClusterApi::new();
        api.expect_list_pods()
            .times(1)
            .returning(|_| Err(Error::config("bad namespace")));

        let finder = StaticFinder::new(Vec::new());
        let w = waiter(api, MockCommandRunner::new(), finder.clone(), config(60));

        let err = w
            .wait_for_component(Component::SystemPods)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert_eq!(finder.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn apiserver_waits_for_kubelet_first() {
        let probes = Arc::new(AtomicUsize::new(0));
        let counter = probes.clone();
        let mut runner = MockCommandRunner::new();
        runner.expect_run_cmd().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(CommandOutput::success("activating"))
            } else {
                Ok(CommandOutput::success("active"))
            }
        });

        let mut api = MockClusterApi::new();
        api.expect_server_version()
            .times(1)
            .returning(|| Ok("v1.32.0".to_string()));

        let w = waiter(api, runner, StaticFinder::new(Vec::new()), config(60));

        w.wait_for_component(Component::ApiServer).await.unwrap();
        assert_eq!(probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stopped_kubelet_is_reported_by_state() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run_cmd()
            .returning(|_| Ok(CommandOutput::success("inactive")));

        let w = waiter(
            MockClusterApi::new(),
            runner,
            StaticFinder::new(Vec::new()),
            config(60),
        );

        let err = w.check(Component::ApiServer).await.unwrap_err();
        assert!(matches!(
            err,
            Error::AgentNotRunning {
                state: AgentState::Stopped
            }
        ));
    }

    #[tokio::test]
    async fn absent_default_service_account_is_retryable() {
        let mut api = MockClusterApi::new();
        api.expect_service_account_exists()
            .returning(|_, _| Ok(false));

        let w = waiter(api, kubelet_active(), StaticFinder::new(Vec::new()), config(60));

        let err = w
            .check(Component::DefaultServiceAccount)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceAccountMissing { .. }));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "service account default/default not found");
    }
}
