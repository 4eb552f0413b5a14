//! Proactive task scheduler.
//!
//! After the initial delay the task runs once. With a positive period it then runs on
//! a fixed schedule until the bot stops; a tick that falls while the previous run is
//! still in progress is skipped, so runs never overlap. Without a period the bot is
//! stopped after the single run.

use super::{BotInner, BotState, ProactiveTask};
use crate::config::ProactiveLifecycleConfiguration;
use crate::fault::run_guarded;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Upper bound for scheduler deadlines; longer delays and periods are clamped to it
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Handle to a running scheduler; dropping it stops the scheduler
pub(crate) struct ProactiveScheduler {
    shutdown_sender: Option<oneshot::Sender<()>>,
}

impl ProactiveScheduler {
    pub(crate) fn start(
        bot: Weak<BotInner>,
        configuration: &ProactiveLifecycleConfiguration,
        task: ProactiveTask,
    ) -> Self {
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let initial_delay = configuration.initial_delay();
        let period = configuration.period();

        info!(
            initial_delay_secs = initial_delay.as_secs_f64(),
            period_secs = period.map(|p| p.as_secs_f64()),
            "Starting proactive scheduler"
        );

        match period {
            Some(period) => tokio::spawn(run_repeating(
                bot,
                task,
                initial_delay,
                period,
                shutdown_receiver,
            )),
            None => tokio::spawn(run_once(bot, task, initial_delay, shutdown_receiver)),
        };

        Self {
            shutdown_sender: Some(shutdown_sender),
        }
    }

    /// Stop scheduling further runs; a run in progress finishes normally
    pub(crate) fn cancel(mut self) {
        if let Some(sender) = self.shutdown_sender.take() {
            // The receiver is gone once the scheduler has finished on its own
            let _ = sender.send(());
        }
    }
}

/// Deadline `delay` from now, never past [`FAR_FUTURE`]
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay.min(FAR_FUTURE))
        .unwrap_or_else(|| now + Duration::from_secs(86400))
}

fn is_running(bot: &Weak<BotInner>) -> bool {
    bot.upgrade()
        .is_some_and(|bot| *bot.state.read() == BotState::Running)
}

async fn run_task(task: &ProactiveTask) {
    if let Err(fault) = run_guarded("proactive task", task()).await {
        error!(error = %fault, "An exception was raised during the bot proactive task");
    }
}

async fn run_once(
    bot: Weak<BotInner>,
    task: ProactiveTask,
    initial_delay: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    tokio::select! {
        biased;
        _ = &mut shutdown => {
            debug!("Proactive scheduler canceled before the first run");
            return;
        }
        _ = tokio::time::sleep_until(deadline_after(initial_delay)) => {}
    }

    if !is_running(&bot) {
        return;
    }
    run_task(&task).await;

    if let Some(bot) = bot.upgrade() {
        info!("One-shot proactive task finished, stopping bot");
        super::Bot::from_inner(bot).stop().await;
    }
}

async fn run_repeating(
    bot: Weak<BotInner>,
    task: ProactiveTask,
    initial_delay: Duration,
    period: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut interval =
        tokio::time::interval_at(deadline_after(initial_delay), period.min(FAR_FUTURE));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                if !is_running(&bot) {
                    break;
                }
                run_task(&task).await;
            }
        }
    }

    debug!("Proactive scheduler stopped");
}
