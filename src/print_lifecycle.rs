//! One-shot print lifecycle for a rendered advisory receipt.
//!
//! `Idle → WaitingForFonts → Delaying → PrintInvoked → {Completed | Blocked}`.
//! The automatic path runs at most once per controller. A blocked print can be
//! retried through [`PrintLifecycleController::trigger_manual`]; a completed
//! print hands control back to the surrounding application through a single
//! redirect.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::advisory::AdvisoryReceipt;
use crate::config::PrintConfig;
use crate::error::PrintResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintState {
    Idle,
    WaitingForFonts,
    Delaying,
    PrintInvoked,
    Completed,
    Blocked,
}

/// What the host reports after a print request that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintOutcome {
    /// The host signalled that printing finished.
    Completed,
    /// The host swallowed the request without printing.
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrintTrigger {
    Automatic,
    Manual,
}

impl PrintTrigger {
    fn as_str(self) -> &'static str {
        match self {
            PrintTrigger::Automatic => "automatic",
            PrintTrigger::Manual => "manual",
        }
    }
}

/// Environment that actually prints and navigates.
#[allow(async_fn_in_trait)]
pub trait PrintHost {
    /// Resolves once fonts are loaded. Hosts without such a signal are ready
    /// immediately.
    async fn fonts_ready(&self) {}

    async fn print(&self) -> PrintResult<PrintOutcome>;

    async fn navigate(&self, url: &str) -> PrintResult<()>;
}

pub struct PrintLifecycleController<H> {
    host: H,
    state: PrintState,
    print_delay: Duration,
    font_ready_timeout: Duration,
    redirect_url: Option<String>,
    print_attempts: u32,
    redirected: bool,
    last_error: Option<String>,
}

impl<H: PrintHost> PrintLifecycleController<H> {
    pub fn new(host: H, receipt: &AdvisoryReceipt, config: &PrintConfig) -> Self {
        let redirect_url = config
            .redirect_after_print
            .then(|| receipt.redirect_url(&config.redirect_base_url));
        Self {
            host,
            state: PrintState::Idle,
            print_delay: config.print_delay(),
            font_ready_timeout: config.font_ready_timeout(),
            redirect_url,
            print_attempts: 0,
            redirected: false,
            last_error: None,
        }
    }

    pub fn state(&self) -> PrintState {
        self.state
    }

    pub fn print_attempts(&self) -> u32 {
        self.print_attempts
    }

    pub fn redirected(&self) -> bool {
        self.redirected
    }

    pub fn redirect_url(&self) -> Option<&str> {
        self.redirect_url.as_deref()
    }

    /// Why the last print attempt ended in `Blocked`, if it did.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn transition(&mut self, next: PrintState) {
        debug!(from = ?self.state, to = ?next, "Print lifecycle transition");
        self.state = next;
    }

    /// Run the automatic print path. Only acts from `Idle`.
    pub async fn run_automatic(&mut self) -> PrintState {
        if self.state != PrintState::Idle {
            debug!(state = ?self.state, "Automatic print already started, ignoring");
            return self.state;
        }

        self.transition(PrintState::WaitingForFonts);
        if tokio::time::timeout(self.font_ready_timeout, self.host.fonts_ready())
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.font_ready_timeout.as_millis() as u64,
                "Font readiness signal did not resolve, printing anyway"
            );
        }

        self.transition(PrintState::Delaying);
        tokio::time::sleep(self.print_delay).await;

        self.invoke_print(PrintTrigger::Automatic).await;
        self.state
    }

    /// Manual fallback. Prints again only while `Blocked`.
    pub async fn trigger_manual(&mut self) -> PrintState {
        if self.state != PrintState::Blocked {
            debug!(state = ?self.state, "Manual print ignored outside blocked state");
            return self.state;
        }
        self.invoke_print(PrintTrigger::Manual).await;
        self.state
    }

    async fn invoke_print(&mut self, trigger: PrintTrigger) {
        self.transition(PrintState::PrintInvoked);
        self.print_attempts += 1;
        info!(
            trigger = trigger.as_str(),
            attempt = self.print_attempts,
            "Invoking print"
        );

        match self.host.print().await {
            Ok(PrintOutcome::Completed) => {
                self.last_error = None;
                self.transition(PrintState::Completed);
                info!(trigger = trigger.as_str(), "Print completed");
                self.redirect_once().await;
            }
            Ok(PrintOutcome::Suppressed) => {
                warn!(trigger = trigger.as_str(), "Print was suppressed by the host");
                self.last_error = Some("print request was suppressed".to_string());
                self.transition(PrintState::Blocked);
            }
            Err(error) => {
                warn!(trigger = trigger.as_str(), error = %error, "Print failed");
                self.last_error = Some(error.to_string());
                self.transition(PrintState::Blocked);
            }
        }
    }

    async fn redirect_once(&mut self) {
        if self.redirected {
            return;
        }
        let Some(url) = self.redirect_url.clone() else {
            return;
        };
        self.redirected = true;
        match self.host.navigate(&url).await {
            Ok(()) => info!(url = %url, "Redirected after print"),
            Err(error) => warn!(url = %url, error = %error, "Post-print redirect failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrintError;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    enum FontSignal {
        Immediate,
        After(Duration),
        Never,
    }

    struct RecordingHost {
        fonts: FontSignal,
        outcomes: Mutex<VecDeque<PrintResult<PrintOutcome>>>,
        prints: AtomicUsize,
        printed_at: Mutex<Vec<Instant>>,
        navigations: Mutex<Vec<String>>,
        fail_navigation: bool,
    }

    impl RecordingHost {
        fn new(fonts: FontSignal, outcomes: Vec<PrintResult<PrintOutcome>>) -> Self {
            Self {
                fonts,
                outcomes: Mutex::new(outcomes.into()),
                prints: AtomicUsize::new(0),
                printed_at: Mutex::new(Vec::new()),
                navigations: Mutex::new(Vec::new()),
                fail_navigation: false,
            }
        }

        fn prints(&self) -> usize {
            self.prints.load(Ordering::SeqCst)
        }

        fn navigations(&self) -> Vec<String> {
            self.navigations.lock().expect("navigations lock").clone()
        }
    }

    impl PrintHost for RecordingHost {
        async fn fonts_ready(&self) {
            match self.fonts {
                FontSignal::Immediate => {}
                FontSignal::After(delay) => tokio::time::sleep(delay).await,
                FontSignal::Never => std::future::pending::<()>().await,
            }
        }

        async fn print(&self) -> PrintResult<PrintOutcome> {
            self.prints.fetch_add(1, Ordering::SeqCst);
            self.printed_at
                .lock()
                .expect("printed_at lock")
                .push(Instant::now());
            self.outcomes
                .lock()
                .expect("outcomes lock")
                .pop_front()
                .unwrap_or(Ok(PrintOutcome::Completed))
        }

        async fn navigate(&self, url: &str) -> PrintResult<()> {
            self.navigations
                .lock()
                .expect("navigations lock")
                .push(url.to_string());
            if self.fail_navigation {
                return Err(PrintError::Browser("no browser".into()));
            }
            Ok(())
        }
    }

    fn receipt_with_stage(stage_id: &str) -> AdvisoryReceipt {
        let mut receipt = AdvisoryReceipt::empty_at(Utc::now());
        receipt.stage_id = stage_id.to_string();
        receipt
    }

    fn controller(host: RecordingHost) -> PrintLifecycleController<RecordingHost> {
        PrintLifecycleController::new(host, &receipt_with_stage("3"), &PrintConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn automatic_print_fires_once_after_delay_and_redirects() {
        let mut ctl = controller(RecordingHost::new(FontSignal::Immediate, vec![]));
        let started = Instant::now();

        assert_eq!(ctl.state(), PrintState::Idle);
        assert_eq!(ctl.run_automatic().await, PrintState::Completed);
        assert_eq!(ctl.host().prints(), 1);

        let printed_at = ctl.host().printed_at.lock().expect("lock")[0];
        assert!(printed_at.duration_since(started) >= Duration::from_millis(800));

        assert!(ctl.redirected());
        assert_eq!(
            ctl.host().navigations(),
            vec!["https://app.cropsync.in/view_problems_by_stage.php?stage_id=3".to_string()]
        );

        // A second automatic run is a no-op.
        assert_eq!(ctl.run_automatic().await, PrintState::Completed);
        assert_eq!(ctl.host().prints(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_fonts_before_delay() {
        let host = RecordingHost::new(FontSignal::After(Duration::from_millis(500)), vec![]);
        let mut ctl = controller(host);
        let started = Instant::now();
        ctl.run_automatic().await;
        let printed_at = ctl.host().printed_at.lock().expect("lock")[0];
        assert!(printed_at.duration_since(started) >= Duration::from_millis(1_300));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_font_signal_is_bounded_by_ceiling() {
        let mut ctl = controller(RecordingHost::new(FontSignal::Never, vec![]));
        let started = Instant::now();
        assert_eq!(ctl.run_automatic().await, PrintState::Completed);
        let printed_at = ctl.host().printed_at.lock().expect("lock")[0];
        let waited = printed_at.duration_since(started);
        assert!(waited >= Duration::from_millis(3_800));
        assert!(waited < Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_print_blocks_and_manual_retry_prints_once_more() {
        let host = RecordingHost::new(
            FontSignal::Immediate,
            vec![Err(PrintError::Spooler("printer offline".into()))],
        );
        let mut ctl = controller(host);

        assert_eq!(ctl.run_automatic().await, PrintState::Blocked);
        assert_eq!(ctl.host().prints(), 1);
        assert!(ctl.last_error().is_some());
        assert!(ctl.host().navigations().is_empty());

        // No duplicate automatic firing.
        assert_eq!(ctl.run_automatic().await, PrintState::Blocked);
        assert_eq!(ctl.host().prints(), 1);

        assert_eq!(ctl.trigger_manual().await, PrintState::Completed);
        assert_eq!(ctl.host().prints(), 2);
        assert_eq!(ctl.print_attempts(), 2);
        assert_eq!(ctl.host().navigations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn suppressed_print_is_treated_as_blocked() {
        let host = RecordingHost::new(
            FontSignal::Immediate,
            vec![Ok(PrintOutcome::Suppressed), Ok(PrintOutcome::Suppressed)],
        );
        let mut ctl = controller(host);
        assert_eq!(ctl.run_automatic().await, PrintState::Blocked);
        assert_eq!(ctl.trigger_manual().await, PrintState::Blocked);
        assert_eq!(ctl.trigger_manual().await, PrintState::Completed);
        assert_eq!(ctl.host().prints(), 3);
        assert!(ctl.redirected());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trigger_after_completion_does_not_navigate_again() {
        let mut ctl = controller(RecordingHost::new(FontSignal::Immediate, vec![]));
        ctl.run_automatic().await;
        assert_eq!(ctl.trigger_manual().await, PrintState::Completed);
        assert_eq!(ctl.trigger_manual().await, PrintState::Completed);
        assert_eq!(ctl.host().prints(), 1);
        assert_eq!(ctl.host().navigations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_trigger_before_automatic_run_is_ignored() {
        let mut ctl = controller(RecordingHost::new(FontSignal::Immediate, vec![]));
        assert_eq!(ctl.trigger_manual().await, PrintState::Idle);
        assert_eq!(ctl.host().prints(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn redirect_disabled_and_navigation_failure_are_harmless() {
        let config = PrintConfig {
            redirect_after_print: false,
            ..PrintConfig::default()
        };
        let mut ctl = PrintLifecycleController::new(
            RecordingHost::new(FontSignal::Immediate, vec![]),
            &receipt_with_stage("9"),
            &config,
        );
        assert_eq!(ctl.run_automatic().await, PrintState::Completed);
        assert!(ctl.redirect_url().is_none());
        assert!(ctl.host().navigations().is_empty());

        let mut host = RecordingHost::new(FontSignal::Immediate, vec![]);
        host.fail_navigation = true;
        let mut ctl = PrintLifecycleController::new(
            host,
            &receipt_with_stage("9"),
            &PrintConfig::default(),
        );
        assert_eq!(ctl.run_automatic().await, PrintState::Completed);
        assert!(ctl.redirected());
        assert_eq!(
            ctl.host().navigations(),
            vec!["https://app.cropsync.in/view_problems_by_stage.php?stage_id=9".to_string()]
        );
    }
}
