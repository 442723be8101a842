use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serialport::SerialPort;
use shared::Category;

use super::{command_for, Actuator, ActuatorError};
use crate::config::ActuatorConfig;

pub type Link = Box<dyn Write + Send>;

/// Opens a fresh link to the device. Split out so the dispatcher's
/// locking and reconnect behaviour can run against in-memory links.
pub trait LinkOpener: Send + Sync {
    fn open(&self) -> Result<Link, ActuatorError>;

    fn describe(&self) -> String;
}

pub struct SerialPortOpener {
    path: String,
    baud_rate: u32,
    write_timeout: Duration,
    settle_delay: Duration,
}

impl SerialPortOpener {
    pub fn from_config(config: &ActuatorConfig) -> Self {
        Self {
            path: config.port.clone(),
            baud_rate: config.baud_rate,
            write_timeout: config.write_timeout(),
            settle_delay: config.settle_delay(),
        }
    }
}

struct SerialLink(Box<dyn SerialPort>);

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl LinkOpener for SerialPortOpener {
    fn open(&self) -> Result<Link, ActuatorError> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(self.write_timeout)
            .open()
            .map_err(|e| ActuatorError::Unavailable(format!("{}: {}", self.path, e)))?;

        // Opening the port resets the board; it ignores input until it has
        // finished booting.
        thread::sleep(self.settle_delay);
        log::info!("Opened serial link {} at {} baud", self.path, self.baud_rate);
        Ok(Box::new(SerialLink(port)))
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

#[derive(Default)]
struct LinkState {
    link: Option<Link>,
    last_failed_open: Option<Instant>,
}

/// Single shared link guarded by a mutex: one command on the wire at a
/// time, other requests queue on the lock.
pub struct SerialActuator<O: LinkOpener> {
    opener: O,
    state: Mutex<LinkState>,
    reconnect_backoff: Duration,
}

impl<O: LinkOpener> SerialActuator<O> {
    pub fn new(opener: O, reconnect_backoff: Duration) -> Self {
        Self {
            opener,
            state: Mutex::new(LinkState::default()),
            reconnect_backoff,
        }
    }

    pub fn connect(&self) -> Result<(), ActuatorError> {
        let mut state = self.lock_state();
        self.ensure_open(&mut state)?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.lock_state().link.is_some()
    }

    /// Writes the command for `category`. A write failure drops the link
    /// and is retried once on a freshly opened one.
    pub fn try_signal(&self, category: Category) -> Result<(), ActuatorError> {
        let command = command_for(category);
        let mut state = self.lock_state();

        match self.write_command(&mut state, command) {
            Err(err @ (ActuatorError::Write(_) | ActuatorError::Timeout)) => {
                log::warn!(
                    "Write to {} failed ({}), reconnecting",
                    self.opener.describe(),
                    err
                );
                state.last_failed_open = None;
                self.write_command(&mut state, command)
            }
            result => result,
        }
    }

    fn write_command(&self, state: &mut LinkState, command: &[u8]) -> Result<(), ActuatorError> {
        let link = self.ensure_open(state)?;
        let written = link.write_all(command).and_then(|()| link.flush());
        if let Err(e) = written {
            state.link = None;
            return Err(e.into());
        }
        Ok(())
    }

    fn ensure_open<'a>(&self, state: &'a mut LinkState) -> Result<&'a mut Link, ActuatorError> {
        if state.link.is_none() {
            if let Some(failed_at) = state.last_failed_open {
                if failed_at.elapsed() < self.reconnect_backoff {
                    return Err(ActuatorError::Unavailable(format!(
                        "{} (waiting before reconnecting)",
                        self.opener.describe()
                    )));
                }
            }

            match self.opener.open() {
                Ok(link) => {
                    state.link = Some(link);
                    state.last_failed_open = None;
                }
                Err(e) => {
                    state.last_failed_open = Some(Instant::now());
                    return Err(e);
                }
            }
        }

        state
            .link
            .as_mut()
            .ok_or_else(|| ActuatorError::Unavailable(self.opener.describe()))
    }

    fn lock_state(&self) -> MutexGuard<'_, LinkState> {
        // A panic mid-write leaves at worst a half-written line; the state
        // itself is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<O: LinkOpener> Actuator for SerialActuator<O> {
    fn signal(&self, category: Category) {
        match self.try_signal(category) {
            Ok(()) => log::debug!("Signalled {} on {}", category, self.opener.describe()),
            Err(e) => log::warn!("Dropped actuator signal for {}: {}", category, e),
        }
    }

    fn close(&self) {
        let mut state = self.lock_state();
        if let Some(mut link) = state.link.take() {
            if let Err(e) = link.flush() {
                log::warn!("Failed to flush {} on close: {}", self.opener.describe(), e);
            }
            log::info!("Closed serial link {}", self.opener.describe());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Wire(Arc<Mutex<Vec<u8>>>);

    impl Wire {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            // One byte per call so interleaving would show up.
            let mut wire = self.0.lock().unwrap();
            wire.push(buf[0]);
            drop(wire);
            thread::yield_now();
            Ok(1)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Failing(io::ErrorKind);

    impl Write for Failing {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(self.0))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestOpener {
        wire: Wire,
        opens: AtomicUsize,
        refuse: AtomicBool,
        // Number of upcoming links that fail every write.
        broken_links: AtomicUsize,
        broken_kind: Option<io::ErrorKind>,
    }

    impl LinkOpener for TestOpener {
        fn open(&self) -> Result<Link, ActuatorError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ActuatorError::Unavailable("test device unplugged".into()));
            }
            let broken = self
                .broken_links
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if broken {
                let kind = self.broken_kind.unwrap_or(io::ErrorKind::BrokenPipe);
                return Ok(Box::new(Failing(kind)));
            }
            Ok(Box::new(self.wire.clone()))
        }

        fn describe(&self) -> String {
            "test".into()
        }
    }

    fn actuator(opener: TestOpener) -> SerialActuator<TestOpener> {
        SerialActuator::new(opener, Duration::from_secs(60))
    }

    #[test]
    fn writes_command_for_each_category() {
        let actuator = actuator(TestOpener::default());
        actuator.try_signal(Category::Cat).unwrap();
        actuator.try_signal(Category::Dog).unwrap();
        actuator.try_signal(Category::Unknown).unwrap();
        assert_eq!(actuator.opener.wire.contents(), b"G\nP\nU\n");
    }

    #[test]
    fn link_is_opened_once_and_reused() {
        let actuator = actuator(TestOpener::default());
        actuator.connect().unwrap();
        for _ in 0..5 {
            actuator.try_signal(Category::Dog).unwrap();
        }
        assert_eq!(actuator.opener.opens.load(Ordering::SeqCst), 1);
        assert!(actuator.is_connected());
    }

    #[test]
    fn failed_write_reconnects_and_retries_once() {
        let opener = TestOpener {
            broken_links: AtomicUsize::new(1),
            ..TestOpener::default()
        };
        let actuator = actuator(opener);
        actuator.try_signal(Category::Cat).unwrap();
        assert_eq!(actuator.opener.opens.load(Ordering::SeqCst), 2);
        assert_eq!(actuator.opener.wire.contents(), b"G\n");
    }

    #[test]
    fn retry_gives_up_after_second_failure() {
        let opener = TestOpener {
            broken_links: AtomicUsize::new(2),
            broken_kind: Some(io::ErrorKind::TimedOut),
            ..TestOpener::default()
        };
        let actuator = actuator(opener);
        let err = actuator.try_signal(Category::Cat).unwrap_err();
        assert!(matches!(err, ActuatorError::Timeout));
        assert!(!actuator.is_connected());
        assert!(actuator.opener.wire.contents().is_empty());
    }

    #[test]
    fn unavailable_device_is_not_reopened_during_backoff() {
        let opener = TestOpener::default();
        opener.refuse.store(true, Ordering::SeqCst);
        let actuator = actuator(opener);

        assert!(matches!(actuator.connect(), Err(ActuatorError::Unavailable(_))));
        assert!(matches!(
            actuator.try_signal(Category::Dog),
            Err(ActuatorError::Unavailable(_))
        ));
        assert_eq!(actuator.opener.opens.load(Ordering::SeqCst), 1);

        // signal swallows the failure.
        actuator.signal(Category::Dog);
    }

    #[test]
    fn device_returning_after_backoff_is_picked_up() {
        let opener = TestOpener::default();
        opener.refuse.store(true, Ordering::SeqCst);
        let actuator = SerialActuator::new(opener, Duration::ZERO);

        assert!(actuator.connect().is_err());
        actuator.opener.refuse.store(false, Ordering::SeqCst);
        actuator.try_signal(Category::Unknown).unwrap();
        assert_eq!(actuator.opener.wire.contents(), b"U\n");
    }

    #[test]
    fn concurrent_signals_never_interleave() {
        let actuator = Arc::new(actuator(TestOpener::default()));
        let categories = [Category::Cat, Category::Dog, Category::Unknown];

        let handles: Vec<_> = (0..24)
            .map(|i| {
                let actuator = Arc::clone(&actuator);
                let category = categories[i % 3];
                thread::spawn(move || actuator.try_signal(category).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let wire = actuator.opener.wire.contents();
        assert_eq!(wire.len(), 48);
        for line in wire.chunks(2) {
            assert!(matches!(line, b"G\n" | b"P\n" | b"U\n"), "garbled line {:?}", line);
        }
    }

    #[test]
    fn close_drops_the_link_and_next_signal_reopens() {
        let actuator = actuator(TestOpener::default());
        actuator.try_signal(Category::Cat).unwrap();
        actuator.close();
        assert!(!actuator.is_connected());

        actuator.try_signal(Category::Dog).unwrap();
        assert_eq!(actuator.opener.opens.load(Ordering::SeqCst), 2);
        assert_eq!(actuator.opener.wire.contents(), b"G\nP\n");
    }
}
