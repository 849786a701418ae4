use std::{cell::RefCell, rc::Rc};

use canhouse_common::{
    filter::AcceptanceFilter,
    messages::CanMessage,
    traits::{CanSendError, CanTransport, ErrorCounters},
};
use canhouse_node::{RelayMbox, SwitchMbox};
use futures::{
    channel::mpsc::{channel, Receiver, Sender},
    StreamExt,
};

/// Anything which can take delivery of a frame from the bus
pub trait MessageSink {
    fn store_message(&self, msg: CanMessage) -> Result<(), CanMessage>;
}

impl MessageSink for RelayMbox {
    fn store_message(&self, msg: CanMessage) -> Result<(), CanMessage> {
        RelayMbox::store_message(self, msg)
    }
}

impl MessageSink for SwitchMbox {
    fn store_message(&self, msg: CanMessage) -> Result<(), CanMessage> {
        SwitchMbox::store_message(self, msg)
    }
}

struct Port<'a> {
    sink: Option<&'a dyn MessageSink>,
    filters: Vec<AcceptanceFilter>,
}

impl Port<'_> {
    /// Like a controller with no filter configured, an empty filter list accepts every frame
    fn accepts(&self, id: u16) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|f| f.accepts(id))
    }
}

#[derive(Default)]
struct Shared<'a> {
    ports: Vec<Port<'a>>,
    monitors: Vec<Sender<CanMessage>>,
}

/// An in-process CAN bus
///
/// Every node gets a [`SimBusTransport`]. A frame sent on one transport is handed to the mailbox
/// of every other node whose filters accept it, and copied to every [`SimBusReceiver`].
pub struct SimBus<'a> {
    shared: Rc<RefCell<Shared<'a>>>,
}

impl Default for SimBus<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> SimBus<'a> {
    const QSIZE: usize = 100;

    pub fn new() -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared::default())),
        }
    }

    fn add_port(&mut self, sink: Option<&'a dyn MessageSink>) -> SimBusTransport<'a> {
        let mut shared = self.shared.borrow_mut();
        shared.ports.push(Port {
            sink,
            filters: Vec::new(),
        });
        SimBusTransport {
            shared: self.shared.clone(),
            port: shared.ports.len() - 1,
            error_counters: ErrorCounters::default(),
        }
    }

    /// Connect a node, returning the transport it sends on
    pub fn attach(&mut self, sink: &'a dyn MessageSink) -> SimBusTransport<'a> {
        self.add_port(Some(sink))
    }

    /// A transport for a tool which only sends
    pub fn new_sender(&mut self) -> SimBusTransport<'a> {
        self.add_port(None)
    }

    /// A receiver seeing every frame sent from now on
    pub fn new_receiver(&mut self) -> SimBusReceiver {
        let (tx, rx) = channel(Self::QSIZE);
        self.shared.borrow_mut().monitors.push(tx);
        SimBusReceiver { rx }
    }
}

pub struct SimBusTransport<'a> {
    shared: Rc<RefCell<Shared<'a>>>,
    port: usize,
    error_counters: ErrorCounters,
}

impl SimBusTransport<'_> {
    /// Set the counters reported by [`CanTransport::error_counters`]
    pub fn set_error_counters(&mut self, counters: ErrorCounters) {
        self.error_counters = counters;
    }

    /// Filters currently installed on this port
    pub fn filters(&self) -> Vec<AcceptanceFilter> {
        self.shared.borrow().ports[self.port].filters.clone()
    }
}

impl CanTransport for SimBusTransport<'_> {
    fn set_filter(&mut self, filter: AcceptanceFilter) {
        self.shared.borrow_mut().ports[self.port].filters.push(filter);
    }

    fn clear_filters(&mut self) {
        self.shared.borrow_mut().ports[self.port].filters.clear();
    }

    fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
        let mut shared = self.shared.borrow_mut();
        for (i, port) in shared.ports.iter().enumerate() {
            if i == self.port || !port.accepts(msg.id()) {
                continue;
            }
            if let Some(sink) = port.sink {
                // Frames the node does not consume are dropped, as by the receive interrupt
                let _ = sink.store_message(msg);
            }
        }
        for monitor in shared.monitors.iter_mut() {
            monitor.try_send(msg).map_err(|e| {
                println!("Error sending to monitor: {:?}", e);
                CanSendError(e.into_inner())
            })?;
        }
        Ok(())
    }

    fn error_counters(&self) -> ErrorCounters {
        self.error_counters
    }
}

pub struct SimBusReceiver {
    rx: Receiver<CanMessage>,
}

impl SimBusReceiver {
    /// Return the next frame if one has already been sent
    pub fn try_recv(&mut self) -> Option<CanMessage> {
        self.rx.try_next().ok().flatten()
    }

    /// Wait for the next frame
    pub async fn recv(&mut self) -> Option<CanMessage> {
        self.rx.next().await
    }

    /// Drain every frame sent so far
    pub fn drain(&mut self) -> Vec<CanMessage> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
