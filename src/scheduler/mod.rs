//! Scheduler (§4.8): one trigger per user, `job_id = "user_<id>_email_processing"`.
//! Each trigger is a tokio task that sleeps until its next fire time, asks the
//! [`crate::gate::ConcurrencyGate`] for admission, and runs the pipeline.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use cron::Schedule;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::{CustomRule, ScheduleConfig, ScheduleType};
use crate::gate::ConcurrencyGate;

#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run_for_user(&self, user_id: i64, is_manual_fetch: bool) -> anyhow::Result<()>;
}

pub fn job_id(user_id: i64) -> String {
    format!("user_{user_id}_email_processing")
}

enum Command {
    Pause,
    Resume,
    Remove,
}

struct Job {
    handle: JoinHandle<()>,
    tx: watch::Sender<Option<Command>>,
}

pub struct Scheduler<R: PipelineRunner + 'static> {
    gate: ConcurrencyGate,
    runner: Arc<R>,
    jobs: Mutex<HashMap<i64, Job>>,
}

impl<R: PipelineRunner + 'static> Scheduler<R> {
    pub fn new(gate: ConcurrencyGate, runner: Arc<R>) -> Self {
        Self {
            gate,
            runner,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Registers (or, per `replace_existing`, atomically replaces) a user's
    /// trigger.
    pub async fn upsert_trigger(&self, user_id: i64, schedule: ScheduleConfig) {
        self.remove_trigger(user_id).await;

        let (tx, rx) = watch::channel(None);
        let gate = self.gate.clone();
        let runner = self.runner.clone();
        let handle = tokio::spawn(run_trigger_loop(user_id, schedule, gate, runner, rx));

        let mut jobs = self.jobs.lock().await;
        jobs.insert(user_id, Job { handle, tx });
    }

    pub async fn pause_trigger(&self, user_id: i64) {
        if let Some(job) = self.jobs.lock().await.get(&user_id) {
            let _ = job.tx.send(Some(Command::Pause));
        }
    }

    pub async fn resume_trigger(&self, user_id: i64) {
        if let Some(job) = self.jobs.lock().await.get(&user_id) {
            let _ = job.tx.send(Some(Command::Resume));
        }
    }

    pub async fn remove_trigger(&self, user_id: i64) {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.remove(&user_id) {
            job.handle.abort();
        }
    }

    /// Stops the Scheduler: aborts every trigger task. In-flight pipelines
    /// admitted through the Gate are left to finish on their own tasks
    /// (§5 "graceful-shutdown path").
    pub async fn shutdown(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
    }
}

async fn run_trigger_loop<R: PipelineRunner + 'static>(
    user_id: i64,
    schedule: ScheduleConfig,
    gate: ConcurrencyGate,
    runner: Arc<R>,
    mut commands: watch::Receiver<Option<Command>>,
) {
    let mut paused = false;
    let mut error_count: u32 = 0;
    let mut first_fire = true;

    loop {
        let next = next_fire_time(Utc::now(), &schedule, user_id, first_fire);
        first_fire = false;
        let sleep_for = (next - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(1));

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = commands.changed() => {
                match *commands.borrow() {
                    Some(Command::Pause) => paused = true,
                    Some(Command::Resume) => paused = false,
                    Some(Command::Remove) | None => {}
                }
                continue;
            }
        }

        if paused {
            continue;
        }

        let Some(admission) = gate.try_admit(user_id).await else {
            tracing::info!(user_id, "firing skipped: gate full or user already running");
            continue;
        };

        match runner.run_for_user(user_id, false).await {
            Ok(()) => error_count = 0,
            Err(err) => {
                error_count += 1;
                tracing::warn!(user_id, error = %err, error_count, "pipeline run failed");
                if error_count >= 5 {
                    tracing::error!(user_id, "5 consecutive failures, suspending trigger");
                    admission.release().await;
                    return;
                }
            }
        }
        admission.release().await;
    }
}

/// Computes the next fire time after `now` for a user's schedule (§4.8).
fn next_fire_time(
    now: DateTime<Utc>,
    schedule: &ScheduleConfig,
    user_id: i64,
    is_first: bool,
) -> DateTime<Utc> {
    match schedule.schedule_type {
        ScheduleType::Interval => {
            if is_first {
                let offset_minutes = (user_id * 3) % 30;
                now + ChronoDuration::minutes(offset_minutes)
            } else {
                now + ChronoDuration::minutes(schedule.interval_minutes as i64)
            }
        }
        ScheduleType::Cron => {
            let hours = if schedule.cron_hours.is_empty() {
                vec![0]
            } else {
                schedule.cron_hours.clone()
            };
            let minutes = if schedule.cron_minutes.is_empty() {
                vec![0]
            } else {
                schedule.cron_minutes.clone()
            };
            next_from_cron_expr(now, &minutes, &hours)
        }
        ScheduleType::Custom => {
            let minutes = vec![schedule.custom_minute];
            let hours: Vec<u32> = match schedule.custom_rule {
                CustomRule::Hourly => (0..24).collect(),
                CustomRule::EvenHours => (0..24).step_by(2).collect(),
                CustomRule::OddHours => (1..24).step_by(2).collect(),
                CustomRule::EveryNHours => {
                    let n = schedule.n_hours.max(1);
                    (0..24).step_by(n as usize).collect()
                }
            };
            next_from_cron_expr(now, &minutes, &hours)
        }
    }
}

fn next_from_cron_expr(now: DateTime<Utc>, minutes: &[u32], hours: &[u32]) -> DateTime<Utc> {
    let min_list = minutes
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let hour_list = hours
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>()
        .join(",");
    // `cron` crate expects a leading seconds field.
    let expr = format!("0 {min_list} {hour_list} * * *");
    match Schedule::from_str(&expr) {
        Ok(schedule) => schedule
            .after(&now)
            .next()
            .unwrap_or_else(|| now + ChronoDuration::hours(1)),
        Err(err) => {
            tracing::warn!(expr, error = %err, "invalid cron expression, falling back to hourly");
            now + ChronoDuration::hours(1)
        }
    }
}

/// Rounds `now` down to the top of the current hour, used by tests that need
/// a stable reference point.
#[cfg(test)]
fn top_of_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_minute(0).unwrap().with_second(0).unwrap().with_nanosecond(0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_schedule() -> ScheduleConfig {
        ScheduleConfig {
            schedule_type: ScheduleType::Interval,
            cron_hours: vec![],
            cron_minutes: vec![],
            custom_rule: CustomRule::Hourly,
            custom_minute: 0,
            n_hours: 2,
            interval_minutes: 30,
        }
    }

    #[test]
    fn interval_first_fire_uses_staggered_offset() {
        let now = Utc::now();
        let schedule = base_schedule();
        let next = next_fire_time(now, &schedule, 7, true);
        let expected_offset = (7 * 3) % 30;
        assert_eq!((next - now).num_minutes(), expected_offset);
    }

    #[test]
    fn interval_subsequent_fire_uses_configured_period() {
        let now = Utc::now();
        let schedule = base_schedule();
        let next = next_fire_time(now, &schedule, 7, false);
        assert_eq!((next - now).num_minutes(), 30);
    }

    #[test]
    fn cron_fires_at_next_matching_hour() {
        let now = top_of_hour(Utc::now()).with_hour(5).unwrap();
        let mut schedule = base_schedule();
        schedule.schedule_type = ScheduleType::Cron;
        schedule.cron_hours = vec![6, 18];
        schedule.cron_minutes = vec![0];
        let next = next_fire_time(now, &schedule, 1, false);
        assert_eq!(next.hour(), 6);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn custom_even_hours_skips_odd_hours() {
        let now = top_of_hour(Utc::now()).with_hour(3).unwrap();
        let mut schedule = base_schedule();
        schedule.schedule_type = ScheduleType::Custom;
        schedule.custom_rule = CustomRule::EvenHours;
        schedule.custom_minute = 0;
        let next = next_fire_time(now, &schedule, 1, false);
        assert_eq!(next.hour() % 2, 0);
    }
}
