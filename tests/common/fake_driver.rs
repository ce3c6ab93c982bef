//! In-process stand-ins for the backend drivers.
//!
//! `FakeFactory` hands out `FakeDriver`s that record every call into a shared
//! `Journal`, so tests can assert on what the façade asked the backend to do
//! without a broker. Failures are scripted with `script_failure`.

use amqp_bridge::{ChannelDriver, ConnectionProperties, Driver, DriverError, DriverFactory, DriverKind};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

#[derive(Default)]
pub struct Journal {
    pub calls: Vec<String>,
    pub created: Vec<(DriverKind, ConnectionProperties)>,
    pub fail: HashSet<&'static str>,
}

pub type Shared = Rc<RefCell<Journal>>;

pub struct FakeFactory {
    pub journal: Shared,
}

impl FakeFactory {
    pub fn new() -> (Rc<Self>, Shared) {
        let journal = Shared::default();
        (Rc::new(Self { journal: journal.clone() }), journal)
    }
}

/// Make the named operation fail from now on, with reply code 320.
pub fn script_failure(journal: &Shared, operation: &'static str) {
    journal.borrow_mut().fail.insert(operation);
}

pub fn calls(journal: &Shared) -> Vec<String> {
    journal.borrow().calls.clone()
}

fn record(journal: &Shared, call: impl Into<String>) {
    journal.borrow_mut().calls.push(call.into());
}

fn outcome(journal: &Shared, operation: &'static str) -> Result<(), DriverError> {
    if journal.borrow().fail.contains(operation) {
        Err(DriverError::new(format!("{} refused by fake broker", operation)).with_code(320))
    } else {
        Ok(())
    }
}

impl DriverFactory for FakeFactory {
    fn create(
        &self,
        kind: DriverKind,
        properties: &ConnectionProperties,
    ) -> Result<Box<dyn Driver>, DriverError> {
        self.journal
            .borrow_mut()
            .created
            .push((kind, properties.clone()));
        record(&self.journal, format!("create {}", kind));

        Ok(Box::new(FakeDriver {
            kind,
            journal: self.journal.clone(),
            connected: false,
            persistent: false,
            next_channel_id: 1,
        }))
    }
}

pub struct FakeDriver {
    kind: DriverKind,
    journal: Shared,
    connected: bool,
    persistent: bool,
    next_channel_id: u16,
}

impl Driver for FakeDriver {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    fn connect(&mut self) -> Result<(), DriverError> {
        record(&self.journal, "connect");
        outcome(&self.journal, "connect")?;
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DriverError> {
        record(&self.journal, "disconnect");
        self.connected = false;
        outcome(&self.journal, "disconnect")
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn open_channel(&mut self) -> Result<Box<dyn ChannelDriver>, DriverError> {
        record(&self.journal, "open_channel");
        outcome(&self.journal, "open_channel")?;

        let id = self.next_channel_id;
        self.next_channel_id += 1;
        Ok(Box::new(FakeChannel {
            id,
            native: self.kind == DriverKind::Native,
            journal: self.journal.clone(),
            prefetch_count: 0,
            prefetch_size: 0,
            connected: true,
        }))
    }

    fn used_channels(&self) -> u16 {
        self.next_channel_id - 1
    }

    fn reconnect(&mut self) -> Result<(), DriverError> {
        if self.kind != DriverKind::Native {
            return Err(DriverError::unsupported("Native reconnect", self.kind));
        }
        record(&self.journal, "native reconnect");
        outcome(&self.journal, "reconnect")?;
        self.connected = true;
        Ok(())
    }

    fn pconnect(&mut self) -> Result<(), DriverError> {
        record(&self.journal, "pconnect");
        outcome(&self.journal, "pconnect")?;
        self.connected = true;
        self.persistent = true;
        Ok(())
    }

    fn pdisconnect(&mut self) -> Result<(), DriverError> {
        record(&self.journal, "pdisconnect");
        self.connected = false;
        self.persistent = false;
        Ok(())
    }

    fn preconnect(&mut self) -> Result<(), DriverError> {
        record(&self.journal, "preconnect");
        self.connected = true;
        self.persistent = true;
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn max_channels(&self) -> Option<u16> {
        (self.kind == DriverKind::Native).then_some(2047)
    }

    fn max_frame_size(&self) -> Option<u32> {
        (self.kind == DriverKind::Native).then_some(131072)
    }

    fn heartbeat_interval(&self) -> Option<u16> {
        (self.kind == DriverKind::Native).then_some(60)
    }
}

pub struct FakeChannel {
    id: u16,
    native: bool,
    journal: Shared,
    prefetch_count: u16,
    prefetch_size: u32,
    connected: bool,
}

impl ChannelDriver for FakeChannel {
    fn channel_id(&self) -> u16 {
        self.id
    }

    fn tx_select(&mut self) -> Result<(), DriverError> {
        record(&self.journal, "tx_select");
        outcome(&self.journal, "tx_select")
    }

    fn tx_commit(&mut self) -> Result<(), DriverError> {
        record(&self.journal, "tx_commit");
        outcome(&self.journal, "tx_commit")
    }

    fn tx_rollback(&mut self) -> Result<(), DriverError> {
        record(&self.journal, "tx_rollback");
        outcome(&self.journal, "tx_rollback")
    }

    fn qos(&mut self, prefetch_size: u32, prefetch_count: u16, global: bool) -> Result<(), DriverError> {
        record(
            &self.journal,
            format!("qos size={} count={} global={}", prefetch_size, prefetch_count, global),
        );
        outcome(&self.journal, "qos")
    }

    fn set_prefetch_count(&mut self, count: u16) -> Result<(), DriverError> {
        record(&self.journal, format!("set_prefetch_count {}", count));
        self.prefetch_count = count;
        self.prefetch_size = 0;
        Ok(())
    }

    fn set_prefetch_size(&mut self, size: u32) -> Result<(), DriverError> {
        record(&self.journal, format!("set_prefetch_size {}", size));
        self.prefetch_size = size;
        self.prefetch_count = 0;
        Ok(())
    }

    fn prefetch_count(&self) -> Option<u16> {
        record(&self.journal, "query prefetch_count");
        self.native.then_some(self.prefetch_count)
    }

    fn prefetch_size(&self) -> Option<u32> {
        record(&self.journal, "query prefetch_size");
        self.native.then_some(self.prefetch_size)
    }

    fn basic_recover(&mut self, requeue: bool) -> Result<(), DriverError> {
        record(&self.journal, format!("basic_recover requeue={}", requeue));
        outcome(&self.journal, "basic_recover")
    }

    fn is_connected(&self) -> Option<bool> {
        self.native.then_some(self.connected)
    }
}
