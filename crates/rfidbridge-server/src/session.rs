//! The per-workstation session state machine.
//!
//! One `SessionFsm` runs per active staff workstation. It consumes
//! exactly one input at a time from a three-way select — a UI request,
//! a reader reply line, or the shutdown signal — and transitions
//! synchronously. All reader commands and UI events it produces are
//! emitted from within the transition; backend calls are awaited inline
//! so each transition is an atomic step.
//!
//! # Failure taxonomy
//!
//! - Reader I/O failure, unparseable reply, or NOK where only OK is
//!   tolerated: fatal. Emit `RFIDError` and stop.
//! - Backend failure (after the pool's single retry): fatal. Emit
//!   `SIPError` and stop.
//! - Domain failure (unknown item, blocked checkout, alarm that did
//!   not toggle): not fatal. The item carries a flag and a status
//!   line, and scanning continues. Alarm failures can be retried.

use rfidbridge_core::model::normalize_barcode;
use rfidbridge_core::{Action, Item, UiEvent, UiRequest};
use rfidbridge_protocol::{ReaderCommand, VendorCodec, PRE_WRITE_SEQUENCE};
use rfidbridge_sip::{self as sip, SipPool, SipResponse};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) const ALARM_ON_FAILED_STATUS: &str = "Feil: fikk ikke skrudd på alarm.";
pub(crate) const ALARM_OFF_FAILED_STATUS: &str = "Feil: fikk ikke skrudd av alarm.";
pub(crate) const WRITE_OK_STATUS: &str = "OK, preget";

fn tag_count_mismatch_status(expected: u32, found: u32) -> String {
    format!("Feil: forventet {expected} brikker, fant {found}")
}

/// Which transaction a scanning session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnKind {
    Checkin,
    Checkout,
}

impl TxnKind {
    fn action(self) -> Action {
        match self {
            TxnKind::Checkin => Action::Checkin,
            TxnKind::Checkout => Action::Checkout,
        }
    }
}

/// What the session is currently waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    WaitForBegin(TxnKind),
    Scanning(TxnKind),
    /// Alarm-on (checkin) or alarm-off (checkout) acknowledgement.
    WaitForAlarmChange(TxnKind),
    WaitForAlarmLeave(TxnKind),
    WaitForRetryAlarm(TxnKind),
    /// Tag count for an item-info request.
    WaitForTagCount,
    /// Pre-write parameter command `n` of the SLP sequence.
    PreWrite(usize),
    /// Tag count check immediately before writing.
    WaitForWriteTagCount,
    Writing,
    WaitForEnd,
    Off,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Idle => write!(f, "Idle"),
            State::WaitForBegin(k) => write!(f, "WaitForBegin({k:?})"),
            State::Scanning(k) => write!(f, "Scanning({k:?})"),
            State::WaitForAlarmChange(k) => write!(f, "WaitForAlarmChange({k:?})"),
            State::WaitForAlarmLeave(k) => write!(f, "WaitForAlarmLeave({k:?})"),
            State::WaitForRetryAlarm(k) => write!(f, "WaitForRetryAlarm({k:?})"),
            State::WaitForTagCount => write!(f, "WaitForTagCount"),
            State::PreWrite(n) => write!(f, "PreWrite({n})"),
            State::WaitForWriteTagCount => write!(f, "WaitForWriteTagCount"),
            State::Writing => write!(f, "Writing"),
            State::WaitForEnd => write!(f, "WaitForEnd"),
            State::Off => write!(f, "Off"),
        }
    }
}

/// The session has terminated; unwind the run loop.
struct Stopped;

type Step = Result<(), Stopped>;

/// Per-session state machine.
///
/// Construct with [`SessionFsm::new`] and drive with [`run`]; the
/// struct is consumed by its own event loop and never shared.
///
/// [`run`]: SessionFsm::run
pub struct SessionFsm {
    host: String,
    branch: String,
    patron: String,
    vendor: VendorCodec,
    state: State,

    current: Item,
    /// Items seen this scanning session, keyed by normalized barcode.
    /// Kept so re-reads and retries don't repeat backend calls.
    items: HashMap<String, Item>,
    /// Tags whose alarm could not be turned on, keyed by normalized
    /// barcode; values are full tag ids for the retry command.
    failed_alarm_on: HashMap<String, String>,
    failed_alarm_off: HashMap<String, String>,
    /// Tags being walked by the current retry request.
    retry_queue: VecDeque<(String, String)>,
    /// Barcode awaiting a retry acknowledgement.
    retrying: Option<String>,

    pool: Arc<SipPool>,
    from_ui: mpsc::Receiver<UiRequest>,
    from_reader: mpsc::Receiver<String>,
    to_reader: mpsc::Sender<String>,
    to_ui: mpsc::Sender<UiEvent>,
    cancel: CancellationToken,
}

/// Channel endpoints wired up by the hub when it spawns a session.
pub struct SessionChannels {
    pub from_ui: mpsc::Receiver<UiRequest>,
    pub from_reader: mpsc::Receiver<String>,
    pub to_reader: mpsc::Sender<String>,
    pub to_ui: mpsc::Sender<UiEvent>,
    pub cancel: CancellationToken,
}

impl SessionFsm {
    pub fn new(host: String, branch: String, pool: Arc<SipPool>, ch: SessionChannels) -> Self {
        SessionFsm {
            host,
            branch,
            patron: String::new(),
            vendor: VendorCodec::new(),
            state: State::Idle,
            current: Item::default(),
            items: HashMap::new(),
            failed_alarm_on: HashMap::new(),
            failed_alarm_off: HashMap::new(),
            retry_queue: VecDeque::new(),
            retrying: None,
            pool,
            from_ui: ch.from_ui,
            from_reader: ch.from_reader,
            to_reader: ch.to_reader,
            to_ui: ch.to_ui,
            cancel: ch.cancel,
        }
    }

    /// The session event loop. Runs until shutdown or a fatal error.
    pub async fn run(mut self) {
        info!(host = %self.host, branch = %self.branch, "session started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                req = self.from_ui.recv() => {
                    let Some(req) = req else { break };
                    debug!(host = %self.host, state = %self.state, action = %req.action, "<- UI request");
                    if self.handle_ui(req).await.is_err() {
                        break;
                    }
                }
                line = self.from_reader.recv() => {
                    match line {
                        Some(line) => {
                            debug!(host = %self.host, state = %self.state, "<- RFID {:?}", line);
                            if self.handle_reader(&line).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            if !matches!(self.state, State::Off) && !self.cancel.is_cancelled() {
                                warn!(host = %self.host, "reader connection lost");
                                let _ = self.to_ui.send(UiEvent::rfid_error()).await;
                            }
                            break;
                        }
                    }
                }
            }
        }

        self.state = State::Off;
        info!(host = %self.host, "session stopped");
        // Dropping `to_reader` here ends the reader write loop, which
        // half-closes the TCP stream before the connection goes away.
    }

    // UI requests ////////////////////////////////////////////////////////

    async fn handle_ui(&mut self, req: UiRequest) -> Step {
        match req.action {
            Action::Checkin => self.start_scan(TxnKind::Checkin, req).await,
            Action::Checkout => self.start_scan(TxnKind::Checkout, req).await,
            Action::ItemInfo => self.start_item_info(req).await,
            Action::Write => self.start_write(req).await,
            Action::RetryAlarmOn => self.start_retry(TxnKind::Checkin).await,
            Action::RetryAlarmOff => self.start_retry(TxnKind::Checkout).await,
            Action::End => self.end_scan().await,
            Action::Connect => {
                warn!(host = %self.host, "ignoring CONNECT request from UI");
                Ok(())
            }
        }
    }

    async fn start_scan(&mut self, kind: TxnKind, req: UiRequest) -> Step {
        if !self.accepts_new_transaction() {
            warn!(host = %self.host, state = %self.state, "ignoring {} in current state", kind.action());
            return Ok(());
        }

        if kind == TxnKind::Checkout {
            if req.patron.is_empty() {
                self.emit(UiEvent::user_error(Action::Checkout, "Patron not supplied"))
                    .await?;
                self.state = State::Idle;
                return Ok(());
            }
            self.patron = req.patron;
        }
        if !req.branch.is_empty() {
            self.branch = req.branch;
        }

        self.items.clear();
        self.failed_alarm_on.clear();
        self.failed_alarm_off.clear();
        self.retry_queue.clear();
        self.retrying = None;
        self.current = Item::default();

        self.vendor.reset();
        self.send_reader(ReaderCommand::BeginScan).await?;
        self.state = State::WaitForBegin(kind);
        Ok(())
    }

    async fn start_item_info(&mut self, req: UiRequest) -> Step {
        if !self.accepts_new_transaction() {
            warn!(host = %self.host, state = %self.state, "ignoring ITEM-INFO in current state");
            return Ok(());
        }

        self.current = self.item_status(&req.item.barcode).await?;

        self.vendor.reset();
        self.send_reader(ReaderCommand::TagCount).await?;
        self.state = State::WaitForTagCount;
        Ok(())
    }

    async fn start_write(&mut self, req: UiRequest) -> Step {
        if !self.accepts_new_transaction() {
            warn!(host = %self.host, state = %self.state, "ignoring WRITE in current state");
            return Ok(());
        }

        if self.current.barcode != req.item.barcode {
            self.current = Item {
                barcode: req.item.barcode,
                ..Item::default()
            };
        }
        self.current.num_tags = req.item.num_tags;

        self.vendor.reset();
        self.send_reader(PRE_WRITE_SEQUENCE[0].clone()).await?;
        self.state = State::PreWrite(0);
        Ok(())
    }

    async fn start_retry(&mut self, kind: TxnKind) -> Step {
        if self.state != State::Scanning(kind) {
            warn!(host = %self.host, state = %self.state, "ignoring retry request in current state");
            return Ok(());
        }

        let failed = match kind {
            TxnKind::Checkin => &self.failed_alarm_on,
            TxnKind::Checkout => &self.failed_alarm_off,
        };
        self.retry_queue = failed
            .iter()
            .map(|(barcode, tag)| (barcode.clone(), tag.clone()))
            .collect();
        if self.retry_queue.is_empty() {
            debug!(host = %self.host, "nothing to retry");
            return Ok(());
        }

        self.send_next_retry(kind).await
    }

    async fn send_next_retry(&mut self, kind: TxnKind) -> Step {
        // The queue is non-empty here; callers check.
        let Some((barcode, tag)) = self.retry_queue.pop_front() else {
            self.state = State::Scanning(kind);
            return Ok(());
        };

        if let Some(item) = self.items.get(&barcode) {
            self.current = item.clone();
        }
        self.current.transfer.clear();

        let cmd = match kind {
            TxnKind::Checkin => ReaderCommand::RetryAlarmOn { tag },
            TxnKind::Checkout => ReaderCommand::RetryAlarmOff { tag },
        };
        self.retrying = Some(barcode);
        self.send_reader(cmd).await?;
        self.state = State::WaitForRetryAlarm(kind);
        Ok(())
    }

    async fn end_scan(&mut self) -> Step {
        self.send_reader(ReaderCommand::EndScan).await?;
        self.state = State::WaitForEnd;
        Ok(())
    }

    fn accepts_new_transaction(&self) -> bool {
        matches!(self.state, State::Idle | State::Scanning(_))
    }

    // Reader replies /////////////////////////////////////////////////////

    async fn handle_reader(&mut self, line: &str) -> Step {
        let resp = match self.vendor.decode(line) {
            Ok(resp) => resp,
            Err(e) => {
                // The unit and the bridge no longer agree on protocol
                // state; the session cannot continue.
                error!(host = %self.host, error = %e, "unparseable reader reply");
                return self.fatal_rfid().await;
            }
        };

        match self.state {
            State::WaitForBegin(kind) => {
                if !resp.ok {
                    error!(host = %self.host, "reader rejected scan start");
                    return self.fatal_rfid().await;
                }
                self.state = State::Scanning(kind);
                Ok(())
            }
            State::Scanning(kind) => {
                let (Some(tag), Some(raw_barcode)) = (resp.tag.clone(), resp.barcode.clone())
                else {
                    warn!(host = %self.host, "ignoring non-tag reply while scanning: {line:?}");
                    return Ok(());
                };
                self.handle_tag_read(kind, resp.ok, tag, &raw_barcode).await
            }
            State::WaitForAlarmChange(kind) => self.on_alarm_change(kind, resp.ok).await,
            State::WaitForAlarmLeave(kind) => {
                if !resp.ok {
                    // Best-effort command; the item was not checked
                    // in/out anyway.
                    warn!(host = %self.host, "reader rejected alarm-leave");
                }
                // Items that were not actually processed must not show
                // a transaction date.
                self.current.date.clear();
                self.emit_item(kind.action()).await?;
                self.state = State::Scanning(kind);
                Ok(())
            }
            State::WaitForRetryAlarm(kind) => self.on_retry_reply(kind, resp.ok).await,
            State::WaitForTagCount => {
                self.current.num_tags = resp.tag_count.unwrap_or(0);
                self.emit_item(Action::ItemInfo).await?;
                self.state = State::Idle;
                Ok(())
            }
            State::PreWrite(step) => {
                if !resp.ok {
                    self.current.write_failed = true;
                    self.emit_item(Action::Write).await?;
                    self.state = State::Idle;
                    return Ok(());
                }
                let next = step + 1;
                if next < PRE_WRITE_SEQUENCE.len() {
                    self.send_reader(PRE_WRITE_SEQUENCE[next].clone()).await?;
                    self.state = State::PreWrite(next);
                } else {
                    self.send_reader(ReaderCommand::TagCount).await?;
                    self.state = State::WaitForWriteTagCount;
                }
                Ok(())
            }
            State::WaitForWriteTagCount => self.on_write_tag_count(resp.ok, resp.tag_count).await,
            State::Writing => {
                if resp.ok {
                    debug!(host = %self.host, written = ?resp.written_ids, "tags written");
                    self.current.status = WRITE_OK_STATUS.to_string();
                    self.current.write_failed = false;
                } else {
                    self.current.write_failed = true;
                }
                self.emit_item(Action::Write).await?;
                self.state = State::Idle;
                Ok(())
            }
            State::WaitForEnd => {
                if !resp.ok {
                    error!(host = %self.host, "reader rejected scan end");
                    return self.fatal_rfid().await;
                }
                self.state = State::Idle;
                Ok(())
            }
            State::Idle | State::Off => {
                warn!(host = %self.host, "ignoring unexpected reader reply: {line:?}");
                Ok(())
            }
        }
    }

    async fn handle_tag_read(
        &mut self,
        kind: TxnKind,
        all_tags_present: bool,
        tag: String,
        raw_barcode: &str,
    ) -> Step {
        let barcode = normalize_barcode(raw_barcode).to_string();

        if !all_tags_present {
            // Item present but a tag is missing or unreadable. Look the
            // title up once; re-reads of the same item reuse it.
            if barcode != self.current.barcode {
                self.current = self.item_status(&barcode).await?;
            }
            self.current.transaction_failed = true;
            self.items.insert(barcode, self.current.clone());

            self.send_reader(ReaderCommand::AlarmLeave).await?;
            self.state = State::WaitForAlarmLeave(kind);
            return Ok(());
        }

        self.current = match kind {
            TxnKind::Checkin => {
                let msg = sip::checkin_msg(&self.branch, &barcode);
                self.sip_call(msg, sip::checkin_item).await?
            }
            TxnKind::Checkout => {
                let msg = sip::checkout_msg(&self.branch, &self.patron, &barcode);
                self.sip_call(msg, sip::checkout_item).await?
            }
        };

        if self.current.unknown || self.current.transaction_failed {
            // Domain failure: report it and keep scanning, alarm
            // untouched.
            self.send_reader(ReaderCommand::AlarmLeave).await?;
            self.state = State::WaitForAlarmLeave(kind);
            return Ok(());
        }

        self.items.insert(barcode.clone(), self.current.clone());
        match kind {
            TxnKind::Checkin => {
                // Remembered until the alarm acknowledgement; kept on
                // failure so the UI can request a retry.
                self.failed_alarm_on.insert(barcode, tag);
                self.send_reader(ReaderCommand::AlarmOn).await?;
            }
            TxnKind::Checkout => {
                self.failed_alarm_off.insert(barcode, tag);
                self.send_reader(ReaderCommand::AlarmOff).await?;
            }
        }
        self.state = State::WaitForAlarmChange(kind);
        Ok(())
    }

    async fn on_alarm_change(&mut self, kind: TxnKind, ok: bool) -> Step {
        let barcode = self.current.barcode.clone();
        match kind {
            TxnKind::Checkin => {
                if ok {
                    self.failed_alarm_on.remove(&barcode);
                    self.current.alarm_on_failed = false;
                    self.current.status.clear();
                } else {
                    self.current.alarm_on_failed = true;
                    self.current.status = ALARM_ON_FAILED_STATUS.to_string();
                }
                // A transfer to the branch we are already at is no
                // transfer.
                if self.current.transfer == self.branch {
                    self.current.transfer.clear();
                }
            }
            TxnKind::Checkout => {
                if ok {
                    self.failed_alarm_off.remove(&barcode);
                    self.current.alarm_off_failed = false;
                    self.current.status.clear();
                } else {
                    self.current.alarm_off_failed = true;
                    self.current.status = ALARM_OFF_FAILED_STATUS.to_string();
                }
            }
        }
        self.emit_item(kind.action()).await?;
        self.state = State::Scanning(kind);
        Ok(())
    }

    async fn on_retry_reply(&mut self, kind: TxnKind, ok: bool) -> Step {
        let barcode = self.retrying.take().unwrap_or_default();
        match kind {
            TxnKind::Checkin => {
                if ok {
                    self.failed_alarm_on.remove(&barcode);
                    self.current.alarm_on_failed = false;
                    self.current.status.clear();
                } else {
                    self.current.alarm_on_failed = true;
                    self.current.status = ALARM_ON_FAILED_STATUS.to_string();
                }
            }
            TxnKind::Checkout => {
                if ok {
                    self.failed_alarm_off.remove(&barcode);
                    self.current.alarm_off_failed = false;
                    self.current.status.clear();
                } else {
                    self.current.alarm_off_failed = true;
                    self.current.status = ALARM_OFF_FAILED_STATUS.to_string();
                }
            }
        }
        self.emit_item(kind.action()).await?;

        if self.retry_queue.is_empty() {
            self.state = State::Scanning(kind);
            Ok(())
        } else {
            self.send_next_retry(kind).await
        }
    }

    async fn on_write_tag_count(&mut self, ok: bool, tag_count: Option<u32>) -> Step {
        if !ok {
            self.current.write_failed = true;
            self.emit_item(Action::Write).await?;
            self.state = State::Idle;
            return Ok(());
        }

        let found = tag_count.unwrap_or(0);
        if found != self.current.num_tags {
            self.current.tag_count_failed = true;
            self.current.status = tag_count_mismatch_status(self.current.num_tags, found);
            self.emit_item(Action::Write).await?;
            self.state = State::Idle;
            return Ok(());
        }

        self.send_reader(ReaderCommand::Write {
            barcode: self.current.barcode.clone(),
            tag_count: self.current.num_tags,
        })
        .await?;
        self.state = State::Writing;
        Ok(())
    }

    // Backend calls //////////////////////////////////////////////////////

    /// One backend turn. A failure here (after the pool's single
    /// retry) is fatal: the SIPError event is emitted and the session
    /// unwinds.
    async fn sip_call(
        &mut self,
        msg: String,
        parse: fn(&SipResponse) -> Item,
    ) -> Result<Item, Stopped> {
        match self.pool.call(&msg).await {
            Ok(resp) => Ok(parse(&resp)),
            Err(e) => {
                error!(host = %self.host, error = %e, "backend call failed");
                let _ = self.to_ui.send(UiEvent::sip_error()).await;
                Err(Stopped)
            }
        }
    }

    async fn item_status(&mut self, barcode: &str) -> Result<Item, Stopped> {
        self.sip_call(sip::item_status_msg(barcode), sip::item_status_item)
            .await
    }

    // Plumbing ///////////////////////////////////////////////////////////

    async fn send_reader(&mut self, cmd: ReaderCommand) -> Step {
        let line = self.vendor.encode(&cmd);
        debug!(host = %self.host, "-> RFID {:?}", line);
        self.to_reader.send(line).await.map_err(|_| Stopped)
    }

    async fn emit(&mut self, event: UiEvent) -> Step {
        self.to_ui.send(event).await.map_err(|_| Stopped)
    }

    async fn emit_item(&mut self, action: Action) -> Step {
        let event = UiEvent::with_item(action, self.current.clone());
        self.emit(event).await
    }

    async fn fatal_rfid(&mut self) -> Step {
        let _ = self.to_ui.send(UiEvent::rfid_error()).await;
        Err(Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(State::Idle.to_string(), "Idle");
        assert_eq!(
            State::WaitForAlarmChange(TxnKind::Checkin).to_string(),
            "WaitForAlarmChange(Checkin)"
        );
        assert_eq!(State::PreWrite(3).to_string(), "PreWrite(3)");
    }

    #[test]
    fn test_tag_count_mismatch_status() {
        assert_eq!(
            tag_count_mismatch_status(2, 1),
            "Feil: forventet 2 brikker, fant 1"
        );
    }

    #[test]
    fn test_txn_kind_action() {
        assert_eq!(TxnKind::Checkin.action(), Action::Checkin);
        assert_eq!(TxnKind::Checkout.action(), Action::Checkout);
    }
}
