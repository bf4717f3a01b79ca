//! In-memory mesh stack.
//!
//! [`SimStack`] behaves like the real stack at the level the gateway can
//! observe: roles, the commissioner state machine, a joiner table, the
//! active dataset and its persistence. Notifications are delivered on a
//! dedicated thread, as the real stack delivers them on its own task, and
//! every call is recorded in a journal for tests to inspect.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use meshgate_protocol::ExtAddress;
use tracing::{debug, trace, warn};

use crate::error::{StackError, StackErrorCode};
use crate::platform::{SharedStore, StoreError};
use crate::stack::{
    CommissionerHandler, CommissionerState, DeviceRole, JoinerEvent, MeshStack, NetworkDataset,
    StackEvent, StackEventHandler,
};

/// One recorded call into the simulated stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    /// `commissioner_start`.
    CommissionerStart,
    /// `set_commissioner_handler`.
    SetCommissionerHandler,
    /// `commissioner_stop`.
    CommissionerStop,
    /// `add_joiner`.
    AddJoiner {
        /// Joiner address, `None` for any device.
        joiner: Option<ExtAddress>,
        /// Credential given.
        credential: String,
        /// Joining window in seconds.
        timeout_secs: u32,
    },
    /// `factory_reset_dataset`.
    FactoryResetDataset,
    /// `set_active_dataset`.
    SetActiveDataset(NetworkDataset),
    /// `enable_interfaces`.
    EnableInterfaces,
}

/// Whether `credential` is an acceptable joiner PSKd: 6 to 32 upper-case
/// alphanumerics, excluding I, O, Q and Z.
pub fn is_valid_pskd(credential: &str) -> bool {
    (6..=32).contains(&credential.len())
        && credential
            .bytes()
            .all(|b| (b.is_ascii_uppercase() || b.is_ascii_digit()) && !matches!(b, b'I' | b'O' | b'Q' | b'Z'))
}

// ============================================================================
// Notification Thread
// ============================================================================

enum Notification {
    Subscribe(Arc<dyn StackEventHandler>),
    Stack(StackEvent),
    State(Arc<dyn CommissionerHandler>, CommissionerState),
    Joiner(Arc<dyn CommissionerHandler>, JoinerEvent, Option<ExtAddress>),
}

/// Spawn the thread that delivers notifications, in order. It exits when
/// the sending side is dropped.
fn spawn_notifier() -> Sender<Notification> {
    let (tx, rx) = unbounded::<Notification>();
    thread::spawn(move || {
        let mut subscribers: Vec<Arc<dyn StackEventHandler>> = Vec::new();
        for notification in rx {
            match notification {
                Notification::Subscribe(handler) => subscribers.push(handler),
                Notification::Stack(event) => {
                    trace!(target: "THREAD", "delivering {:?} to {} subscribers", event, subscribers.len());
                    for handler in &subscribers {
                        handler.on_stack_event(event);
                    }
                }
                Notification::State(handler, state) => handler.on_state_changed(state),
                Notification::Joiner(handler, event, joiner) => handler.on_joiner_event(event, joiner),
            }
        }
    });
    tx
}

// ============================================================================
// Simulated Stack
// ============================================================================

#[derive(Debug, Clone)]
struct JoinerEntry {
    joiner: Option<ExtAddress>,
    credential: String,
    expires_at: Instant,
}

/// In-memory [`MeshStack`].
pub struct SimStack {
    role: DeviceRole,
    commissioner: CommissionerState,
    handler: Option<Arc<dyn CommissionerHandler>>,
    joiners: Vec<JoinerEntry>,
    dataset: Option<NetworkDataset>,
    interfaces_up: bool,
    store: Option<SharedStore>,
    journal: Vec<StackCall>,
    notifications: Sender<Notification>,
}

impl SimStack {
    /// A disabled stack with no dataset and no persistence.
    pub fn new() -> Self {
        SimStack {
            role: DeviceRole::Disabled,
            commissioner: CommissionerState::Disabled,
            handler: None,
            joiners: Vec::new(),
            dataset: None,
            interfaces_up: false,
            store: None,
            journal: Vec::new(),
            notifications: spawn_notifier(),
        }
    }

    /// A stack that keeps its dataset in `store`, loading any dataset
    /// persisted there. Interfaces stay down until enabled.
    pub fn with_store(store: SharedStore) -> Result<Self, StoreError> {
        let dataset = store.lock().load_dataset()?;
        if let Some(dataset) = &dataset {
            debug!(target: "THREAD", "restored dataset for network {:?}", dataset.network_name);
        }
        Ok(SimStack {
            dataset,
            store: Some(store),
            ..SimStack::new()
        })
    }

    /// A stack already attached as leader of a network called `sim`.
    pub fn leader() -> Self {
        SimStack {
            role: DeviceRole::Leader,
            dataset: Some(NetworkDataset {
                network_name: "sim".to_string(),
                network_key: [0x11; 16],
                extended_pan_id: [0x22; 8],
                pan_id: 0x3344,
                channel: 15,
            }),
            interfaces_up: true,
            ..SimStack::new()
        }
    }

    /// Every call made so far.
    pub fn journal(&self) -> &[StackCall] {
        &self.journal
    }

    /// Take and clear the journal.
    pub fn take_journal(&mut self) -> Vec<StackCall> {
        std::mem::take(&mut self.journal)
    }

    /// The active dataset.
    pub fn active_dataset(&self) -> Option<&NetworkDataset> {
        self.dataset.as_ref()
    }

    /// Whether the network interfaces are up.
    pub fn interfaces_up(&self) -> bool {
        self.interfaces_up
    }

    /// Number of unexpired joiner entries.
    pub fn joiner_count(&self) -> usize {
        let now = Instant::now();
        self.joiners.iter().filter(|j| j.expires_at > now).count()
    }

    /// Play a joiner's handshake against the joiner table.
    ///
    /// Succeeds when an unexpired entry for `joiner` (or a wildcard entry)
    /// holds `credential`; the joiner's events are then delivered and the
    /// concrete entry is consumed.
    pub fn simulate_join(&mut self, joiner: ExtAddress, credential: &str) -> Result<(), StackError> {
        self.expire_joiners();
        let position = self
            .joiners
            .iter()
            .position(|j| j.joiner == Some(joiner) && j.credential == credential)
            .or_else(|| self.joiners.iter().position(|j| j.joiner.is_none() && j.credential == credential))
            .ok_or(StackError::new("joiner_handshake", StackErrorCode::Security))?;

        for event in [JoinerEvent::Connected, JoinerEvent::Finalize, JoinerEvent::End] {
            self.notify_joiner(event, Some(joiner));
        }
        if self.joiners[position].joiner.is_some() {
            self.joiners.remove(position);
        }
        Ok(())
    }

    fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            warn!(target: "THREAD", "notification thread gone, event dropped");
        }
    }

    fn notify_state(&self) {
        if let Some(handler) = &self.handler {
            self.notify(Notification::State(Arc::clone(handler), self.commissioner));
        }
    }

    fn notify_joiner(&self, event: JoinerEvent, joiner: Option<ExtAddress>) {
        if let Some(handler) = &self.handler {
            self.notify(Notification::Joiner(Arc::clone(handler), event, joiner));
        }
    }

    fn expire_joiners(&mut self) {
        let now = Instant::now();
        let (live, expired): (Vec<_>, Vec<_>) = self.joiners.drain(..).partition(|j| j.expires_at > now);
        self.joiners = live;
        for entry in expired {
            self.notify_joiner(JoinerEvent::Removed, entry.joiner);
        }
    }

    fn set_commissioner(&mut self, state: CommissionerState) {
        self.commissioner = state;
        self.notify_state();
    }
}

impl Default for SimStack {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshStack for SimStack {
    fn device_role(&self) -> DeviceRole {
        self.role
    }

    fn commissioner_state(&self) -> CommissionerState {
        self.commissioner
    }

    fn commissioner_start(&mut self, handler: Arc<dyn CommissionerHandler>) -> Result<(), StackError> {
        self.journal.push(StackCall::CommissionerStart);
        if !self.role.can_commission() {
            return Err(StackError::new("commissioner_start", StackErrorCode::InvalidState));
        }
        if self.commissioner != CommissionerState::Disabled {
            return Err(StackError::new("commissioner_start", StackErrorCode::Already));
        }
        self.handler = Some(handler);
        self.set_commissioner(CommissionerState::Petitioning);
        self.set_commissioner(CommissionerState::Active);
        Ok(())
    }

    fn set_commissioner_handler(&mut self, handler: Arc<dyn CommissionerHandler>) {
        self.journal.push(StackCall::SetCommissionerHandler);
        self.handler = Some(handler);
    }

    fn commissioner_stop(&mut self) -> Result<(), StackError> {
        self.journal.push(StackCall::CommissionerStop);
        if self.commissioner == CommissionerState::Disabled {
            return Err(StackError::new("commissioner_stop", StackErrorCode::Already));
        }
        for entry in std::mem::take(&mut self.joiners) {
            self.notify_joiner(JoinerEvent::Removed, entry.joiner);
        }
        self.set_commissioner(CommissionerState::Disabled);
        Ok(())
    }

    fn add_joiner(&mut self, joiner: Option<&ExtAddress>, credential: &str, timeout_secs: u32) -> Result<(), StackError> {
        self.journal.push(StackCall::AddJoiner {
            joiner: joiner.copied(),
            credential: credential.to_string(),
            timeout_secs,
        });
        if self.commissioner != CommissionerState::Active {
            return Err(StackError::new("add_joiner", StackErrorCode::InvalidState));
        }
        if !is_valid_pskd(credential) {
            return Err(StackError::new("add_joiner", StackErrorCode::InvalidArgs));
        }

        self.expire_joiners();
        let joiner = joiner.copied();
        self.joiners.retain(|j| j.joiner != joiner);
        self.joiners.push(JoinerEntry {
            joiner,
            credential: credential.to_string(),
            expires_at: Instant::now() + Duration::from_secs(u64::from(timeout_secs)),
        });
        if joiner.is_some() {
            self.notify_joiner(JoinerEvent::Start, joiner);
        }
        Ok(())
    }

    fn factory_reset_dataset(&mut self) -> Result<(), StackError> {
        self.journal.push(StackCall::FactoryResetDataset);
        let was_attached = self.role.is_attached();

        if self.commissioner != CommissionerState::Disabled {
            self.joiners.clear();
            self.set_commissioner(CommissionerState::Disabled);
        }
        self.dataset = None;
        self.interfaces_up = false;
        self.role = DeviceRole::Disabled;

        if let Some(store) = &self.store {
            store.lock().erase().map_err(|e| {
                warn!(target: "THREAD", "failed to erase settings: {}", e);
                StackError::new("factory_reset", StackErrorCode::Failed)
            })?;
        }
        if was_attached {
            self.notify(Notification::Stack(StackEvent::Detached));
        }
        Ok(())
    }

    fn set_active_dataset(&mut self, dataset: &NetworkDataset) -> Result<(), StackError> {
        self.journal.push(StackCall::SetActiveDataset(dataset.clone()));
        if dataset.network_name.is_empty() {
            return Err(StackError::new("set_active_dataset", StackErrorCode::InvalidArgs));
        }
        if let Some(store) = &self.store {
            store.lock().save_dataset(dataset).map_err(|e| {
                warn!(target: "THREAD", "failed to persist dataset: {}", e);
                StackError::new("set_active_dataset", StackErrorCode::Failed)
            })?;
        }
        self.dataset = Some(dataset.clone());
        Ok(())
    }

    fn has_active_dataset(&self) -> bool {
        self.dataset.is_some()
    }

    fn enable_interfaces(&mut self) -> Result<(), StackError> {
        self.journal.push(StackCall::EnableInterfaces);
        if self.dataset.is_none() {
            return Err(StackError::new("enable_interfaces", StackErrorCode::InvalidState));
        }
        self.interfaces_up = true;
        if !self.role.is_attached() {
            // Alone on the channel, so the device forms its own partition.
            self.role = DeviceRole::Leader;
            self.notify(Notification::Stack(StackEvent::Attached));
        }
        Ok(())
    }

    fn subscribe(&mut self, handler: Arc<dyn StackEventHandler>) {
        self.notify(Notification::Subscribe(handler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{shared_store, MemoryStore};
    use crossbeam_channel::Receiver;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<CommissionerState>>,
        joiners: Mutex<Vec<(JoinerEvent, Option<ExtAddress>)>>,
    }

    impl CommissionerHandler for Recorder {
        fn on_state_changed(&self, state: CommissionerState) {
            self.states.lock().push(state);
        }

        fn on_joiner_event(&self, event: JoinerEvent, joiner: Option<ExtAddress>) {
            self.joiners.lock().push((event, joiner));
        }
    }

    struct EventTap(Sender<StackEvent>);

    impl StackEventHandler for EventTap {
        fn on_stack_event(&self, event: StackEvent) {
            let _ = self.0.send(event);
        }
    }

    fn tap(stack: &mut SimStack) -> Receiver<StackEvent> {
        let (tx, rx) = unbounded();
        stack.subscribe(Arc::new(EventTap(tx)));
        rx
    }

    fn wait_for<T>(what: impl Fn() -> Option<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(value) = what() {
                return value;
            }
            assert!(Instant::now() < deadline, "timed out waiting for notification");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn dataset(name: &str) -> NetworkDataset {
        NetworkDataset {
            network_name: name.to_string(),
            network_key: [7; 16],
            extended_pan_id: [8; 8],
            pan_id: 0xbeef,
            channel: 15,
        }
    }

    const ADDR: ExtAddress = ExtAddress([0, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);

    #[test]
    fn test_pskd_rules() {
        assert!(is_valid_pskd("ABCD1234"));
        assert!(is_valid_pskd("J01NME"));
        assert!(!is_valid_pskd("ABC12"));
        assert!(!is_valid_pskd("abcd1234"));
        assert!(!is_valid_pskd("ABCDO123"));
        assert!(!is_valid_pskd("ZZZZZZ"));
        assert!(!is_valid_pskd(&"A".repeat(33)));
    }

    #[test]
    fn test_enable_interfaces_attaches_as_leader() {
        let mut stack = SimStack::new();
        let events = tap(&mut stack);

        assert!(stack.enable_interfaces().is_err());
        assert!(!stack.interfaces_up());
        stack.set_active_dataset(&dataset("lab")).unwrap();
        stack.enable_interfaces().unwrap();
        assert!(stack.interfaces_up());

        assert_eq!(stack.device_role(), DeviceRole::Leader);
        assert_eq!(events.recv_timeout(Duration::from_secs(2)).unwrap(), StackEvent::Attached);
    }

    #[test]
    fn test_factory_reset_detaches() {
        let mut stack = SimStack::leader();
        let events = tap(&mut stack);

        stack.factory_reset_dataset().unwrap();
        assert_eq!(stack.device_role(), DeviceRole::Disabled);
        assert!(!stack.has_active_dataset());
        assert_eq!(events.recv_timeout(Duration::from_secs(2)).unwrap(), StackEvent::Detached);
    }

    #[test]
    fn test_commissioner_notifications() {
        let mut stack = SimStack::leader();
        let recorder = Arc::new(Recorder::default());

        stack.commissioner_start(recorder.clone()).unwrap();
        stack.add_joiner(Some(&ADDR), "ABCD1234", 120).unwrap();
        stack.simulate_join(ADDR, "ABCD1234").unwrap();
        stack.commissioner_stop().unwrap();

        wait_for(|| (recorder.states.lock().len() == 3).then_some(()));
        assert_eq!(
            *recorder.states.lock(),
            vec![CommissionerState::Petitioning, CommissionerState::Active, CommissionerState::Disabled]
        );
        let events: Vec<_> = recorder.joiners.lock().iter().map(|(e, _)| *e).collect();
        assert_eq!(
            events,
            vec![JoinerEvent::Start, JoinerEvent::Connected, JoinerEvent::Finalize, JoinerEvent::End]
        );
        assert!(recorder.joiners.lock().iter().all(|(_, id)| *id == Some(ADDR)));
    }

    #[test]
    fn test_add_joiner_rules() {
        let mut stack = SimStack::leader();
        let err = stack.add_joiner(None, "ABCD1234", 120).unwrap_err();
        assert_eq!(err.code, StackErrorCode::InvalidState);

        stack.commissioner_start(Arc::new(Recorder::default())).unwrap();
        let err = stack.add_joiner(None, "abcd", 120).unwrap_err();
        assert_eq!(err.code, StackErrorCode::InvalidArgs);

        stack.add_joiner(None, "ABCD1234", 120).unwrap();
        stack.add_joiner(None, "WXYV5678", 120).unwrap();
        stack.add_joiner(Some(&ADDR), "ABCD1234", 120).unwrap();
        assert_eq!(stack.joiner_count(), 2);

        // The wildcard entry now holds the replacement credential.
        assert!(stack.simulate_join(ExtAddress([9; 8]), "ABCD1234").is_err());
        stack.simulate_join(ExtAddress([9; 8]), "WXYV5678").unwrap();
    }

    #[test]
    fn test_joiner_entries_expire() {
        let mut stack = SimStack::leader();
        stack.commissioner_start(Arc::new(Recorder::default())).unwrap();
        stack.add_joiner(Some(&ADDR), "ABCD1234", 0).unwrap();
        assert_eq!(stack.joiner_count(), 0);
        assert!(stack.simulate_join(ADDR, "ABCD1234").is_err());
    }

    #[test]
    fn test_dataset_persisted_and_restored() {
        let store = shared_store(MemoryStore::new());

        let mut stack = SimStack::with_store(Arc::clone(&store)).unwrap();
        stack.set_active_dataset(&dataset("persisted")).unwrap();
        drop(stack);

        let mut rebooted = SimStack::with_store(Arc::clone(&store)).unwrap();
        assert_eq!(rebooted.active_dataset().map(|d| d.network_name.as_str()), Some("persisted"));
        assert_eq!(rebooted.device_role(), DeviceRole::Disabled);

        rebooted.factory_reset_dataset().unwrap();
        assert_eq!(store.lock().load_dataset().unwrap(), None);
    }

    #[test]
    fn test_journal_records_calls() {
        let mut stack = SimStack::new();
        let _ = stack.enable_interfaces();
        stack.set_active_dataset(&dataset("j")).unwrap();
        assert_eq!(
            stack.take_journal(),
            vec![StackCall::EnableInterfaces, StackCall::SetActiveDataset(dataset("j"))]
        );
        assert!(stack.journal().is_empty());
    }
}
