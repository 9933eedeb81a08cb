// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process-wide signal fan-out.
//!
//! One [`SignalBus`] is built at process entry and handed to every
//! coordinator. OS signals are received on a dedicated listener thread and
//! dispatched synchronously to the registered targets.

use crate::errors::{Error, Result};
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};

/// Receiver of bus signals. Handlers run on the listener thread and may block.
pub trait SignalTarget: Send + Sync {
    fn on_interrupt(&self);
    fn on_suspend(&self);
    fn on_continue(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSignal {
    Interrupt,
    Terminate,
    Suspend,
    Continue,
}

impl fmt::Display for BusSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusSignal::Interrupt => write!(f, "interrupt"),
            BusSignal::Terminate => write!(f, "terminate"),
            BusSignal::Suspend => write!(f, "suspend"),
            BusSignal::Continue => write!(f, "continue"),
        }
    }
}

type Targets = Mutex<Vec<(u64, Weak<dyn SignalTarget>)>>;

fn lock(targets: &Targets) -> MutexGuard<'_, Vec<(u64, Weak<dyn SignalTarget>)>> {
    targets.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct SignalBus {
    targets: Arc<Targets>,
    next_id: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps a target registered until dropped.
#[must_use = "the target is unregistered when the registration is dropped"]
pub struct Registration {
    id: u64,
    targets: Weak<Targets>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(targets) = self.targets.upgrade() {
            lock(&targets).retain(|(id, _)| *id != self.id);
        }
    }
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, target: Weak<dyn SignalTarget>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.targets).push((id, target));
        Registration {
            id,
            targets: Arc::downgrade(&self.targets),
        }
    }

    pub fn target_count(&self) -> usize {
        lock(&self.targets)
            .iter()
            .filter(|(_, t)| t.strong_count() > 0)
            .count()
    }

    /// Deliver `signal` to every live target.
    pub fn dispatch(&self, signal: BusSignal) {
        fan_out(&self.targets, signal);
    }

    /// Start listening for OS signals. Calling it again is a no-op.
    pub fn install(&self) -> Result<()> {
        let mut listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            debug!("signal handlers already installed");
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::SignalInstall)?;
        let streams = {
            let _enter = runtime.enter();
            Streams::new().map_err(Error::SignalInstall)?
        };
        let targets = Arc::clone(&self.targets);
        let handle = thread::Builder::new()
            .name("signal-bus".to_string())
            .spawn(move || runtime.block_on(listen(streams, targets)))
            .map_err(Error::SignalInstall)?;

        *listener = Some(handle);
        info!("signal handlers installed");
        Ok(())
    }
}

fn fan_out(targets: &Targets, signal: BusSignal) {
    let live: Vec<Arc<dyn SignalTarget>> = {
        let mut targets = lock(targets);
        targets.retain(|(_, t)| t.strong_count() > 0);
        targets.iter().filter_map(|(_, t)| t.upgrade()).collect()
    };
    debug!("dispatching {signal} to {} targets", live.len());
    for target in live {
        match signal {
            BusSignal::Interrupt | BusSignal::Terminate => target.on_interrupt(),
            BusSignal::Suspend => target.on_suspend(),
            BusSignal::Continue => target.on_continue(),
        }
    }
}

async fn listen(mut streams: Streams, targets: Arc<Targets>) {
    while let Some(signal) = streams.next().await {
        info!("received {signal}");
        fan_out(&targets, signal);
    }
    warn!("signal streams closed, no longer forwarding signals");
}

#[cfg(unix)]
struct Streams {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    suspend: tokio::signal::unix::Signal,
    resume: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Streams {
    fn new() -> std::io::Result<Self> {
        use nix::sys::signal::Signal;
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            suspend: signal(SignalKind::from_raw(Signal::SIGTSTP as i32))?,
            resume: signal(SignalKind::from_raw(Signal::SIGCONT as i32))?,
        })
    }

    async fn next(&mut self) -> Option<BusSignal> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some(BusSignal::Interrupt),
            Some(()) = self.terminate.recv() => Some(BusSignal::Terminate),
            Some(()) = self.suspend.recv() => Some(BusSignal::Suspend),
            Some(()) = self.resume.recv() => Some(BusSignal::Continue),
            else => None,
        }
    }
}

#[cfg(windows)]
struct Streams {
    ctrl_c: tokio::signal::windows::CtrlC,
    ctrl_close: tokio::signal::windows::CtrlClose,
}

#[cfg(windows)]
impl Streams {
    fn new() -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
            ctrl_close: tokio::signal::windows::ctrl_close()?,
        })
    }

    async fn next(&mut self) -> Option<BusSignal> {
        tokio::select! {
            Some(()) = self.ctrl_c.recv() => Some(BusSignal::Interrupt),
            Some(()) = self.ctrl_close.recv() => Some(BusSignal::Terminate),
            else => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        interrupts: AtomicUsize,
        suspends: AtomicUsize,
        continues: AtomicUsize,
    }

    impl SignalTarget for Counter {
        fn on_interrupt(&self) {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_suspend(&self) {
            self.suspends.fetch_add(1, Ordering::SeqCst);
        }
        fn on_continue(&self) {
            self.continues.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn register(bus: &SignalBus, counter: &Arc<Counter>) -> Registration {
        let weak: Weak<dyn SignalTarget> = Arc::downgrade(counter) as Weak<dyn SignalTarget>;
        bus.register(weak)
    }

    #[test]
    fn test_dispatch_fans_out_to_all_targets() {
        let bus = SignalBus::new();
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        let _ra = register(&bus, &a);
        let _rb = register(&bus, &b);

        bus.dispatch(BusSignal::Interrupt);
        bus.dispatch(BusSignal::Terminate);
        bus.dispatch(BusSignal::Suspend);
        bus.dispatch(BusSignal::Continue);

        for counter in [&a, &b] {
            assert_eq!(counter.interrupts.load(Ordering::SeqCst), 2);
            assert_eq!(counter.suspends.load(Ordering::SeqCst), 1);
            assert_eq!(counter.continues.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_registration_drop_unregisters() {
        let bus = SignalBus::new();
        let counter = Arc::new(Counter::default());
        let registration = register(&bus, &counter);
        assert_eq!(bus.target_count(), 1);

        drop(registration);
        assert_eq!(bus.target_count(), 0);
        bus.dispatch(BusSignal::Interrupt);
        assert_eq!(counter.interrupts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dead_targets_are_skipped() {
        let bus = SignalBus::new();
        let counter = Arc::new(Counter::default());
        let _registration = register(&bus, &counter);
        drop(counter);
        assert_eq!(bus.target_count(), 0);
        bus.dispatch(BusSignal::Suspend);
    }

    #[cfg(unix)]
    #[test]
    fn test_installed_bus_forwards_os_signals() {
        use nix::sys::signal::{Signal, raise};
        use std::time::{Duration, Instant};

        let bus = SignalBus::new();
        bus.install().unwrap();
        bus.install().unwrap();
        let counter = Arc::new(Counter::default());
        let _registration = register(&bus, &counter);

        // SIGCONT is harmless for a running test process.
        raise(Signal::SIGCONT).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.continues.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(counter.continues.load(Ordering::SeqCst), 1);
    }
}
