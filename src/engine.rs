//! Send queries, retransmit them on timeout, and match them with replies.
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use hopconfirm::config::Config;
//! use hopconfirm::engine::Confirm;
//! use hopconfirm::models::Query;
//!
//! let engine = Confirm::open(&Config::default()).unwrap();
//! let query = Query::icmp4(
//!     Ipv4Addr::new(192, 0, 2, 1),
//!     Ipv4Addr::new(198, 51, 100, 1),
//!     5, 0, 0, 3, 7,
//! ).unwrap();
//! engine.submit(query, |query| println!("{}", query));
//! ```
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use hyperloglog::HyperLogLog;
use log::{debug, error, info, trace};

use crate::config::Config;
use crate::encoder::encode;
use crate::logger::StatisticsLogger;
use crate::matcher::Matcher;
use crate::models::{Identity, Query, State};
use crate::packet::Packet;
use crate::receive_loop::ReceiveLoop;
use crate::receiver::Receiver;
use crate::scheduler::{Scheduler, TimerHandle, TimerThread};
use crate::sender::{Link, Sender, Transmit};
use crate::utilities::unix_now;

/// Completion handler of a query, invoked once with the finalized query.
pub type Completion = Box<dyn FnOnce(Query) + Send + 'static>;

#[derive(Clone, Debug)]
pub struct EngineStatistics {
    /// Number of queries submitted.
    pub submitted: u64,
    /// Number of probes sent, including retransmissions.
    pub transmissions: u64,
    pub retransmissions: u64,
    /// Number of probes rejected by the transmitter.
    pub send_failed: u64,
    pub answered: u64,
    pub exhausted: u64,
    pub frames_received: u64,
    /// Frames that could not be parsed.
    pub frames_malformed: u64,
    /// Frames that do not answer any outstanding query.
    pub frames_unmatched: u64,
    /// Distinct responder addresses.
    pub responders: HyperLogLog,
}

impl Default for EngineStatistics {
    fn default() -> Self {
        Self {
            submitted: 0,
            transmissions: 0,
            retransmissions: 0,
            send_failed: 0,
            answered: 0,
            exhausted: 0,
            frames_received: 0,
            frames_malformed: 0,
            frames_unmatched: 0,
            responders: HyperLogLog::new(0.001),
        }
    }
}

impl Display for EngineStatistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "submitted={}", self.submitted)?;
        write!(f, " transmissions={}", self.transmissions)?;
        write!(f, " retransmissions={}", self.retransmissions)?;
        write!(f, " send_failed={}", self.send_failed)?;
        write!(f, " answered={}", self.answered)?;
        write!(f, " exhausted={}", self.exhausted)?;
        write!(f, " frames_received={}", self.frames_received)?;
        write!(f, " frames_malformed={}", self.frames_malformed)?;
        write!(f, " frames_unmatched={}", self.frames_unmatched)?;
        write!(f, " responders_distinct={}", self.responders.len().trunc())
    }
}

/// A submitted query waiting for an answer.
struct Pending {
    query: Query,
    completion: Completion,
    timer: Option<TimerHandle>,
    /// Distinguishes successive registrations of the same identity.
    serial: u64,
}

struct Outstanding {
    matcher: Matcher<Pending>,
    next_serial: u64,
}

struct Inner {
    link: Link,
    timeout: Duration,
    transmitter: Mutex<Box<dyn Transmit + Send>>,
    scheduler: Arc<dyn Scheduler + Send + Sync>,
    outstanding: Mutex<Outstanding>,
    statistics: Arc<Mutex<EngineStatistics>>,
    this: Weak<Inner>,
}

/// The confirmation engine.
///
/// Every submitted query is finalized exactly once, either when a matching
/// reply is received or when its retransmissions are exhausted, and then
/// handed back to its completion handler.
pub struct Confirm {
    inner: Arc<Inner>,
    receive_loop: Option<ReceiveLoop>,
    logger: Option<StatisticsLogger>,
}

impl Confirm {
    /// Build an engine over the given collaborators.
    ///
    /// Inbound frames are delivered by calling [`Confirm::on_frame`] or
    /// [`Confirm::on_packet`].
    pub fn new(
        transmitter: Box<dyn Transmit + Send>,
        scheduler: Arc<dyn Scheduler + Send + Sync>,
        timeout: Duration,
    ) -> Self {
        let link = transmitter.link();
        let inner = Arc::new_cyclic(|this| Inner {
            link,
            timeout,
            transmitter: Mutex::new(transmitter),
            scheduler,
            outstanding: Mutex::new(Outstanding {
                matcher: Matcher::new(),
                next_serial: 0,
            }),
            statistics: Arc::new(Mutex::new(EngineStatistics::default())),
            this: this.clone(),
        });
        Confirm {
            inner,
            receive_loop: None,
            logger: None,
        }
    }

    /// Open the pcap sender and sniffer on the configured interface, and
    /// start the timer and capture threads.
    pub fn open(config: &Config) -> Result<Self> {
        info!("{}", config);
        let capture_timeout = i32::try_from(config.capture_timeout.as_millis())
            .context("capture_timeout does not fit in milliseconds as i32")?;
        let sender = Sender::new(
            &config.interface,
            config.gateway_mac_v4,
            config.gateway_mac_v6,
            config.dry_run,
        )?;
        let receiver = Receiver::new(
            &config.interface,
            config.capture_buffer_size,
            capture_timeout,
        )?;
        let l2_protocol = receiver.l2_protocol();

        let mut engine = Self::new(
            Box::new(sender),
            Arc::new(TimerThread::new()),
            config.timeout,
        );

        let inner = engine.inner.clone();
        engine.receive_loop = Some(ReceiveLoop::new(receiver, move |data, timestamp| {
            match Packet::from_frame(data, l2_protocol, timestamp) {
                Ok(packet) => inner.on_packet(packet),
                Err(error) => inner.on_malformed(&error),
            }
        }));
        engine.logger = config
            .statistics_interval
            .map(|interval| StatisticsLogger::new(engine.inner.statistics.clone(), interval));
        Ok(engine)
    }

    /// Send `query` and call `completion` once it is answered or exhausted.
    ///
    /// `completion` runs on the thread that finalizes the query: the caller,
    /// the capture thread or the timer thread. A panic on the timer thread is
    /// logged and does not stop the other timers.
    ///
    /// # Panics
    ///
    /// Panics if the query was already submitted, or if a query with the same
    /// identity is outstanding.
    pub fn submit<F>(&self, query: Query, completion: F)
    where
        F: FnOnce(Query) + Send + 'static,
    {
        self.inner.submit(query, Box::new(completion))
    }

    /// Handle a captured frame, framed as the probes are.
    pub fn on_frame(&self, data: &[u8], timestamp: Duration) {
        match Packet::from_frame(data, self.inner.link.l2_protocol, timestamp) {
            Ok(packet) => self.inner.on_packet(packet),
            Err(error) => self.inner.on_malformed(&error),
        }
    }

    /// Handle a parsed reply.
    pub fn on_packet(&self, packet: Packet) {
        self.inner.on_packet(packet)
    }

    /// Number of queries waiting for an answer.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.lock().unwrap().matcher.len()
    }

    pub fn statistics(&self) -> &Arc<Mutex<EngineStatistics>> {
        &self.inner.statistics
    }

    pub fn link(&self) -> Link {
        self.inner.link
    }

    /// Stop the capture and finalize the outstanding queries as exhausted.
    pub fn stop(self) {
        drop(self)
    }
}

impl Drop for Confirm {
    fn drop(&mut self) {
        if let Some(receive_loop) = self.receive_loop.take() {
            receive_loop.stop();
        }
        self.inner.abandon_all();
        if let Some(logger) = self.logger.take() {
            logger.stop();
        }
    }
}

impl Inner {
    fn submit(&self, mut query: Query, completion: Completion) {
        if query.state != State::Idle {
            panic!("query {} was already submitted", query.identity());
        }
        let identity = query.identity();
        let segment_key = query.segment_key();

        let mut outstanding = self.outstanding.lock().unwrap();
        if outstanding.matcher.contains(&identity) {
            drop(outstanding);
            panic!("a query is already outstanding for {}", identity);
        }
        self.statistics.lock().unwrap().submitted += 1;
        query.state = State::Sent;
        query.attempts = 0;

        match self.transmit(&mut query) {
            Ok(()) => {
                let serial = outstanding.next_serial;
                outstanding.next_serial += 1;
                // Armed under the lock so that the timer cannot fire before
                // the query is registered.
                let timer = self.arm(identity, serial, 0);
                outstanding.matcher.register(
                    identity,
                    segment_key,
                    Pending {
                        query,
                        completion,
                        timer: Some(timer),
                        serial,
                    },
                );
            }
            Err(error) => {
                drop(outstanding);
                error!("send_failed {}: {:?}", identity, error);
                self.statistics.lock().unwrap().send_failed += 1;
                self.exhaust(query, completion);
            }
        }
    }

    /// Encode and send the probe of `query`, recording the send time.
    fn transmit(&self, query: &mut Query) -> Result<()> {
        let frame = encode(query, &self.link);
        self.transmitter
            .lock()
            .unwrap()
            .send(&frame, query.dst_addr)?;

        let now = unix_now();
        query.probe = Packet::from_frame(&frame, self.link.l2_protocol, now).ok();
        query.timestamps.first_sent.get_or_insert(now);
        query.timestamps.last_sent = Some(now);
        query.timestamps.deadline = Some(now + self.timeout);
        self.statistics.lock().unwrap().transmissions += 1;
        trace!("sent {} attempt={}", query.identity(), query.attempts);
        Ok(())
    }

    fn arm(&self, identity: Identity, serial: u64, attempt: u32) -> TimerHandle {
        let this = self.this.clone();
        self.scheduler.schedule(
            self.timeout,
            Box::new(move || {
                if let Some(inner) = this.upgrade() {
                    inner.on_timeout(identity, serial, attempt);
                }
            }),
        )
    }

    fn on_timeout(&self, identity: Identity, serial: u64, attempt: u32) {
        let mut outstanding = self.outstanding.lock().unwrap();
        let pending = match outstanding.matcher.get_mut(&identity) {
            Some(pending) if pending.serial == serial && pending.query.attempts == attempt => {
                pending
            }
            _ => {
                trace!("stale timer {} serial={} attempt={}", identity, serial, attempt);
                return;
            }
        };
        pending.timer = None;

        if pending.query.attempts < pending.query.max_retries {
            pending.query.attempts += 1;
            match self.transmit(&mut pending.query) {
                Ok(()) => {
                    let attempt = pending.query.attempts;
                    pending.timer = Some(self.arm(identity, serial, attempt));
                    self.statistics.lock().unwrap().retransmissions += 1;
                    debug!("retransmit {} attempt={}", identity, attempt);
                    return;
                }
                Err(error) => {
                    error!("send_failed {}: {:?}", identity, error);
                    self.statistics.lock().unwrap().send_failed += 1;
                }
            }
        }

        if let Some(pending) = outstanding.matcher.remove(&identity) {
            drop(outstanding);
            self.exhaust(pending.query, pending.completion);
        }
    }

    fn on_packet(&self, packet: Packet) {
        self.statistics.lock().unwrap().frames_received += 1;
        let mut outstanding = self.outstanding.lock().unwrap();
        let (candidate, pending) = match outstanding.matcher.resolve(&packet) {
            Some(resolved) => resolved,
            None => {
                drop(outstanding);
                self.statistics.lock().unwrap().frames_unmatched += 1;
                return;
            }
        };
        if let Some(timer) = pending.timer {
            self.scheduler.cancel(timer);
        }
        drop(outstanding);

        let Pending {
            mut query,
            completion,
            ..
        } = pending;
        query.state = State::Answered;
        query.responder = Some(candidate.responder);
        query.timestamps.answered = Some(packet.timestamp());
        query.response = Some(packet);
        debug!(
            "answered {} responder={} origin={:?}",
            candidate.identity, candidate.responder, candidate.origin
        );
        {
            let mut statistics = self.statistics.lock().unwrap();
            statistics.answered += 1;
            statistics.responders.insert(&candidate.responder);
        }
        completion(query);
    }

    fn on_malformed(&self, error: &anyhow::Error) {
        trace!("malformed frame: {:?}", error);
        let mut statistics = self.statistics.lock().unwrap();
        statistics.frames_received += 1;
        statistics.frames_malformed += 1;
    }

    fn exhaust(&self, mut query: Query, completion: Completion) {
        query.state = State::Exhausted;
        query.attempts = query.max_retries + 1;
        query.responder = None;
        debug!("exhausted {}", query.identity());
        self.statistics.lock().unwrap().exhausted += 1;
        completion(query);
    }

    /// Finalize every outstanding query without an answer.
    fn abandon_all(&self) {
        let drained = self.outstanding.lock().unwrap().matcher.drain();
        for (identity, pending) in drained {
            if let Some(timer) = pending.timer {
                self.scheduler.cancel(timer);
            }
            debug!("abandon {}", identity);
            self.exhaust(pending.query, pending.completion);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::mpsc::channel;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::anyhow;
    use mockall::predicate::eq;

    use crate::config::Config;
    use crate::engine::Confirm;
    use crate::models::{Query, State};
    use crate::scheduler::{MockScheduler, TimerHandle, TimerTask};
    use crate::sender::{Link, MockTransmit};

    fn query() -> Query {
        Query::icmp4(
            Ipv4Addr::new(192, 0, 2, 1),
            Ipv4Addr::new(198, 51, 100, 1),
            5,
            0,
            0,
            3,
            7,
        )
        .unwrap()
    }

    #[test]
    fn test_send_failure_exhausts_immediately() {
        let mut transmitter = MockTransmit::new();
        transmitter.expect_link().return_const(Link::raw());
        transmitter
            .expect_send()
            .times(1)
            .returning(|_, _| Err(anyhow!("device unavailable")));
        let mut scheduler = MockScheduler::new();
        scheduler.expect_schedule().never();

        let engine = Confirm::new(
            Box::new(transmitter),
            Arc::new(scheduler),
            Duration::from_secs(1),
        );
        let (tx, rx) = channel();
        engine.submit(query(), move |query| tx.send(query).unwrap());

        let query = rx.try_recv().unwrap();
        assert_eq!(query.state(), State::Exhausted);
        assert_eq!(query.attempts(), 3);
        assert!(query.responder().is_none());
        assert_eq!(engine.outstanding(), 0);
        assert_eq!(engine.statistics().lock().unwrap().send_failed, 1);
    }

    #[test]
    fn test_submit_arms_one_timer_with_the_timeout() {
        let mut transmitter = MockTransmit::new();
        transmitter.expect_link().return_const(Link::raw());
        transmitter
            .expect_send()
            .withf(|frame, dst_addr| {
                frame.len() == 28 && *dst_addr == IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1))
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let tasks: Arc<Mutex<Vec<TimerTask>>> = Arc::default();
        let tasks_mock = tasks.clone();
        let mut scheduler = MockScheduler::new();
        scheduler
            .expect_schedule()
            .with(eq(Duration::from_millis(250)), mockall::predicate::always())
            .times(1)
            .returning(move |_, task| {
                tasks_mock.lock().unwrap().push(task);
                TimerHandle(1)
            });
        // Outstanding queries are abandoned when the engine is dropped.
        scheduler
            .expect_cancel()
            .with(eq(TimerHandle(1)))
            .times(1)
            .return_const(());

        let engine = Confirm::new(
            Box::new(transmitter),
            Arc::new(scheduler),
            Duration::from_millis(250),
        );
        let (tx, rx) = channel();
        engine.submit(query(), move |query| tx.send(query).unwrap());
        assert_eq!(engine.outstanding(), 1);
        assert!(rx.try_recv().is_err());

        drop(engine);
        let query = rx.try_recv().unwrap();
        assert_eq!(query.state(), State::Exhausted);
        assert_eq!(tasks.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_open_rejects_capture_timeout_overflow() {
        let config = Config {
            capture_timeout: Duration::from_secs(30 * 24 * 3600),
            ..Default::default()
        };
        let error = Confirm::open(&config).err().unwrap();
        assert!(error.to_string().contains("capture_timeout"));
    }

    #[test]
    #[should_panic(expected = "already submitted")]
    fn test_resubmit_finalized_query() {
        let mut transmitter = MockTransmit::new();
        transmitter.expect_link().return_const(Link::raw());
        transmitter
            .expect_send()
            .returning(|_, _| Err(anyhow!("device unavailable")));
        let scheduler = MockScheduler::new();
        let engine = Confirm::new(
            Box::new(transmitter),
            Arc::new(scheduler),
            Duration::from_secs(1),
        );
        let (tx, rx) = channel();
        engine.submit(query(), move |query| tx.send(query).unwrap());
        let query = rx.try_recv().unwrap();
        engine.submit(query, |_| {});
    }
}
