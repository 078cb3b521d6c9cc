//! Scripted transport and backend for exercising the protocol without a device

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use nusb::transfer::TransferError;

use crate::{
    DfuConnection, DfuDescriptor, DfuDevice, DfuError, MatchCriteria, Quirks,
    UsbBackend, status::DfuState, transport::DfuTransport,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Request {
    Out {
        request: u8,
        value: u16,
        data: Vec<u8>,
    },
    In {
        request: u8,
        value: u16,
        length: u16,
    },
}

impl Request {
    pub(crate) fn out(request: u8, value: u16, data: &[u8]) -> Self {
        Request::Out {
            request,
            value,
            data: data.to_vec(),
        }
    }

    pub(crate) const fn input(request: u8, value: u16, length: u16) -> Self {
        Request::In {
            request,
            value,
            length,
        }
    }
}

enum Reply {
    Data(Vec<u8>),
    Error,
}

#[derive(Default)]
struct ScriptState {
    replies: VecDeque<Reply>,
    failing_out: Vec<u8>,
    requests: Vec<Request>,
    opened: usize,
    closed: usize,
}

/// Shared record of the requests a fake device received and the replies
/// it still has to give to IN requests
#[derive(Clone, Default)]
pub(crate) struct Script(Rc<RefCell<ScriptState>>);

impl Script {
    pub(crate) fn new() -> Self {
        Script::default()
    }

    pub(crate) fn push_in(&self, data: Vec<u8>) {
        self.0.borrow_mut().replies.push_back(Reply::Data(data));
    }

    pub(crate) fn push_status(&self, status: u8, state: DfuState) {
        self.push_in(vec![status, 0, 0, 0, state.code(), 0]);
    }

    pub(crate) fn push_error(&self) {
        self.0.borrow_mut().replies.push_back(Reply::Error);
    }

    /// Make every OUT request with this request code fail
    pub(crate) fn fail_out(&self, request: u8) {
        self.0.borrow_mut().failing_out.push(request);
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.0.borrow().requests.clone()
    }

    pub(crate) fn opened(&self) -> usize {
        self.0.borrow().opened
    }

    pub(crate) fn closed(&self) -> usize {
        self.0.borrow().closed
    }
}

pub(crate) struct FakeTransport {
    script: Script,
    interface: u8,
}

impl DfuTransport for FakeTransport {
    fn interface_number(&self) -> u8 {
        self.interface
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<usize, DfuError> {
        let mut state = self.script.0.borrow_mut();
        state.requests.push(Request::out(request, value, data));
        if state.failing_out.contains(&request) {
            return Err(DfuError::Transfer(TransferError::Stall));
        }
        Ok(data.len())
    }

    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        let mut state = self.script.0.borrow_mut();
        state.requests.push(Request::input(request, value, length));
        match state.replies.pop_front() {
            Some(Reply::Data(mut data)) => {
                data.truncate(length as usize);
                Ok(data)
            }
            Some(Reply::Error) | None => {
                Err(DfuError::Transfer(TransferError::Stall))
            }
        }
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        self.script.0.borrow_mut().closed += 1;
    }
}

pub(crate) fn transport(script: &Script) -> FakeTransport {
    FakeTransport {
        script: script.clone(),
        interface: 0,
    }
}

pub(crate) fn connection(
    script: &Script,
    quirks: Quirks,
) -> DfuConnection<FakeTransport> {
    DfuConnection::new(
        transport(script),
        0,
        DfuDescriptor::default(),
        64,
        (0x0483, 0xdf11),
        quirks,
    )
}

/// DFU 1.1 descriptor: download / upload capable, manifestation tolerant
pub(crate) fn descriptor(transfer_size: u16) -> DfuDescriptor {
    let size = transfer_size.to_le_bytes();
    DfuDescriptor::parse(&[0x09, 0x21, 0x07, 0xff, 0x00, size[0], size[1], 0x10, 0x01])
        .unwrap()
}

pub(crate) struct FakeBackend {
    pub(crate) script: Script,
    pub(crate) devices: Vec<DfuDevice<usize>>,
    pub(crate) fail_open: bool,
}

impl FakeBackend {
    pub(crate) fn new(script: &Script, devices: Vec<DfuDevice<usize>>) -> Self {
        FakeBackend {
            script: script.clone(),
            devices,
            fail_open: false,
        }
    }
}

impl UsbBackend for FakeBackend {
    type Handle = usize;
    type Transport = FakeTransport;

    fn probe(
        &self,
        criteria: &MatchCriteria,
    ) -> Result<Vec<DfuDevice<usize>>, DfuError> {
        Ok(self
            .devices
            .iter()
            .filter(|dev| criteria.matches(*dev))
            .cloned()
            .collect())
    }

    fn open(&self, device: &DfuDevice<usize>) -> Result<FakeTransport, DfuError> {
        self.script.0.borrow_mut().opened += 1;
        if self.fail_open {
            return Err(DfuError::Transfer(TransferError::Disconnected));
        }
        Ok(FakeTransport {
            script: self.script.clone(),
            interface: device.interface(),
        })
    }
}

pub(crate) fn fake_device(
    index: usize,
    vendor_id: u16,
    product_id: u16,
) -> DfuDevice<usize> {
    DfuDevice::new(index, vendor_id, product_id, 0, 0)
        .with_descriptor(descriptor(1024))
        .with_max_packet_size(64)
}
