//! Service calls and pending-call records
//!
//! An outbound Invoke wraps a [`ServiceCall`]; when a reply is expected
//! the call is tracked as a [`PendingCall`] keyed by transaction id until
//! the peer answers or the connection closes.

use std::sync::Arc;

use crate::amf::AmfValue;

/// Callback invoked when a pending call completes (result or failure)
pub type CallCallback = Arc<dyn Fn(&ServiceCall) + Send + Sync>;

/// Completion status of a service call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Call dispatched, no reply yet
    Pending,
    /// Peer replied with a result value
    SuccessResult,
    /// Peer replied with a null result
    SuccessNull,
    /// Call completed without a result value
    SuccessVoid,
    /// The named service does not exist
    ServiceNotFound,
    /// The named method does not exist on the service
    MethodNotFound,
    /// The peer denied access to the method
    AccessDenied,
    /// The invoked method raised an error
    InvocationException,
    /// The connection closed while the call was outstanding
    NotConnected,
}

/// A single RPC-style call, outbound or inbound
#[derive(Debug, Clone)]
pub struct ServiceCall {
    /// Target service, or `None` for connection-level methods
    pub service_name: Option<String>,
    /// Method name
    pub method: String,
    /// Call arguments
    pub arguments: Vec<AmfValue>,
    /// Completion status
    pub status: CallStatus,
    /// Result value once the call succeeded
    pub result: Option<AmfValue>,
}

impl ServiceCall {
    /// Create a connection-level call
    pub fn new(method: impl Into<String>, arguments: Vec<AmfValue>) -> Self {
        Self {
            service_name: None,
            method: method.into(),
            arguments,
            status: CallStatus::Pending,
            result: None,
        }
    }

    /// Create a call targeting a named service
    pub fn to_service(
        service_name: impl Into<String>,
        method: impl Into<String>,
        arguments: Vec<AmfValue>,
    ) -> Self {
        Self {
            service_name: Some(service_name.into()),
            ..Self::new(method, arguments)
        }
    }

    /// Check whether the call reached a success status
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            CallStatus::SuccessResult | CallStatus::SuccessNull | CallStatus::SuccessVoid
        )
    }
}

/// An outbound call awaiting a peer reply
///
/// Registered in the connection's pending-call map before the Invoke is
/// written, so a fast peer reply can never miss the record.
pub struct PendingCall {
    call: ServiceCall,
    callbacks: Vec<CallCallback>,
}

impl PendingCall {
    /// Create a pending call for a connection-level method
    pub fn new(method: impl Into<String>, arguments: Vec<AmfValue>) -> Self {
        Self {
            call: ServiceCall::new(method, arguments),
            callbacks: Vec::new(),
        }
    }

    /// Wrap an existing service call
    pub fn from_call(call: ServiceCall) -> Self {
        Self {
            call,
            callbacks: Vec::new(),
        }
    }

    /// Register a completion callback
    pub fn register_callback(&mut self, callback: CallCallback) {
        self.callbacks.push(callback);
    }

    /// The wrapped call
    pub fn call(&self) -> &ServiceCall {
        &self.call
    }

    /// Complete the call with a result value and fire all callbacks once
    pub fn complete_with_result(mut self, result: AmfValue) {
        self.call.status = if result.is_null_or_undefined() {
            CallStatus::SuccessNull
        } else {
            CallStatus::SuccessResult
        };
        self.call.result = Some(result);
        self.fire_callbacks();
    }

    /// Complete the call with a terminal status and fire all callbacks once
    pub fn complete_with_status(mut self, status: CallStatus) {
        self.call.status = status;
        self.fire_callbacks();
    }

    fn fire_callbacks(self) {
        for callback in &self.callbacks {
            callback(&self.call);
        }
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("call", &self.call)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// A call whose result is produced after the inbound invoke returns
///
/// Holds everything needed to write the result later: the transaction id
/// the peer used, the channel to answer on and the call itself.
#[derive(Debug, Clone)]
pub struct DeferredResult {
    /// Transaction id of the inbound invoke being answered
    pub transaction_id: u32,
    /// Channel the result must be written to
    pub channel_id: u32,
    /// The call awaiting its result
    pub call: ServiceCall,
}
