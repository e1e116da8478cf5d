//! Shared mock collaborators for scenario tests.
//!
//! An `Arc<Mutex<VecDeque<...>>>` message queue plus a handful of query
//! helpers, scoped down to the narrow collaborator surface this crate
//! actually calls (`collaborators::*`) rather than a full wire transport.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use rvoip_sip_core::prelude::*;

use rvoip_proxy_core::collaborators::{
    AuthOutcome, Collaborators, ConnectionHandle, Dialog, DialogAdmit, ReplySynthesis, Transport, UasHandle, UasReplyBridge,
};

#[derive(Default)]
pub struct MockTransport {
    pub sent_requests: Mutex<VecDeque<(Request, SocketAddr)>>,
    pub sent_responses: Mutex<VecDeque<(Response, SocketAddr)>>,
    pub local_names: Mutex<Vec<String>>,
    pub connected: Mutex<HashMap<ConnectionHandle, SocketAddr>>,
    pub fail_sends: std::sync::atomic::AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_local(&self, host: &str) {
        self.local_names.lock().await.push(host.to_string());
    }

    pub async fn sent_request_count(&self) -> usize {
        self.sent_requests.lock().await.len()
    }

    pub async fn sent_responses_count(&self) -> usize {
        self.sent_responses.lock().await.len()
    }

    pub async fn requests_with_method(&self, method: Method) -> Vec<Request> {
        self.sent_requests
            .lock()
            .await
            .iter()
            .filter(|(r, _)| r.method == method)
            .map(|(r, _)| r.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_request(&self, request: &Request, destination: SocketAddr) -> rvoip_proxy_core::Result<()> {
        if self.fail_sends.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(rvoip_proxy_core::Error::NetworkError("mock send failure".into()));
        }
        self.sent_requests.lock().await.push_back((request.clone(), destination));
        Ok(())
    }

    async fn resend_request(&self, request: &Request, destination: SocketAddr) -> rvoip_proxy_core::Result<()> {
        self.send_request(request, destination).await
    }

    async fn send_response(&self, response: &Response, destination: SocketAddr) -> rvoip_proxy_core::Result<()> {
        self.sent_responses.lock().await.push_back((response.clone(), destination));
        Ok(())
    }

    fn add_via(&self, mut request: Request, branch: &str) -> Request {
        let via = Via::new("SIP", "2.0", "UDP", "127.0.0.1", Some(5060), vec![Param::branch(branch)]).unwrap();
        request.headers.insert(0, TypedHeader::Via(via));
        request
    }

    async fn get_connected(&self, flow: &ConnectionHandle) -> Option<SocketAddr> {
        self.connected.lock().await.get(flow).copied()
    }

    fn is_local(&self, uri: &Uri) -> bool {
        let host = uri.host.to_string();
        self.local_names.try_lock().map(|names| names.iter().any(|n| n == &host)).unwrap_or(false)
    }

    fn is_local_route(&self, request: &Request) -> bool {
        let Some(TypedHeader::Route(route)) = request.header(&HeaderName::Route) else {
            return false;
        };
        let Some(top) = route.0.first() else { return false };
        let host = top.0.uri.host.to_string();
        self.local_names.try_lock().map(|names| names.iter().any(|n| n == &host)).unwrap_or(false)
    }
}

#[derive(Default)]
pub struct MockDialog {
    pub admit: Mutex<DialogAdmitPlan>,
    pub acked: Mutex<Vec<String>>,
    pub responses_seen: Mutex<usize>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub enum DialogAdmitPlan {
    #[default]
    Ok,
    RequestPending,
    UnknownDialog,
}

#[async_trait]
impl Dialog for MockDialog {
    async fn request(&self, _request: &Request) -> DialogAdmit {
        match *self.admit.lock().await {
            DialogAdmitPlan::Ok => DialogAdmit::Ok,
            DialogAdmitPlan::RequestPending => DialogAdmit::RequestPending,
            DialogAdmitPlan::UnknownDialog => DialogAdmit::UnknownDialog,
        }
    }

    async fn response(&self, _response: &Response) {
        *self.responses_seen.lock().await += 1;
    }

    async fn ack(&self, request: &Request) {
        if let Some(call_id) = request.call_id() {
            self.acked.lock().await.push(call_id.value().to_string());
        }
    }

    async fn new_local_seq(&self, _call_id: &str) -> u32 {
        2
    }
}

/// Always refuses (`NotApplicable`) unless a scripted `Authorization`-ready
/// retry request has been queued with `push_retry`.
#[derive(Default)]
pub struct MockAuth {
    pub retries: Mutex<VecDeque<Request>>,
}

impl MockAuth {
    pub async fn push_retry(&self, request: Request) {
        self.retries.lock().await.push_back(request);
    }
}

#[async_trait]
impl rvoip_proxy_core::collaborators::Auth for MockAuth {
    async fn make_request(&self, _request: &Request, _challenge: &Response) -> AuthOutcome {
        match self.retries.lock().await.pop_front() {
            Some(req) => AuthOutcome::Authorized(req),
            None => AuthOutcome::NotApplicable,
        }
    }

    async fn update_cache(&self, _request: &Request, _response: &Response) {}
}

/// Builds synthetic responses the way a stateless reply generator would:
/// copy dialog-identifying headers off the request, stamp the given status.
pub struct MockReply;

impl ReplySynthesis for MockReply {
    fn reply(&self, request: &Request, status: StatusCode, reason: Option<&str>) -> Response {
        let mut builder = ResponseBuilder::new(status, reason);
        if let Some(from) = request.from() {
            builder = builder.header(TypedHeader::From(from.clone()));
        }
        if let Some(to) = request.to() {
            builder = builder.header(TypedHeader::To(to.clone()));
        }
        if let Some(call_id) = request.call_id() {
            builder = builder.header(TypedHeader::CallId(call_id.clone()));
        }
        if let Some(cseq) = request.cseq() {
            builder = builder.cseq(cseq.seq, cseq.method.clone());
        }
        for via in request.via_headers() {
            builder = builder.header(TypedHeader::Via(via));
        }
        builder.build()
    }
}

#[derive(Default)]
pub struct MockUasBridge {
    pub delivered: Mutex<Vec<(UasHandle, Response)>>,
    pub acks: Mutex<Vec<(UasHandle, Option<String>)>>,
}

#[async_trait]
impl UasReplyBridge for MockUasBridge {
    async fn deliver(&self, uas: &UasHandle, response: Response) {
        self.delivered.lock().await.push((uas.clone(), response));
    }

    async fn acknowledge(&self, uas: &UasHandle, message_id: Option<&str>) {
        self.acks.lock().await.push((uas.clone(), message_id.map(|s| s.to_string())));
    }
}

impl MockUasBridge {
    pub async fn last(&self) -> Option<Response> {
        self.delivered.lock().await.last().map(|(_, r)| r.clone())
    }

    pub async fn count(&self) -> usize {
        self.delivered.lock().await.len()
    }

    pub async fn ack_count(&self) -> usize {
        self.acks.lock().await.len()
    }
}

pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub dialog: Arc<MockDialog>,
    pub auth: Arc<MockAuth>,
    pub uas_bridge: Arc<MockUasBridge>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            transport: Arc::new(MockTransport::new()),
            dialog: Arc::new(MockDialog::default()),
            auth: Arc::new(MockAuth::default()),
            uas_bridge: Arc::new(MockUasBridge::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            transport: self.transport.clone(),
            dialog: self.dialog.clone(),
            auth: self.auth.clone(),
            reply: Arc::new(MockReply),
            uas_bridge: self.uas_bridge.clone(),
        }
    }
}

pub fn uri(s: &str) -> Uri {
    Uri::from_str(s).unwrap()
}

/// Build a minimal but dialog-complete INVITE, using the builder surface
/// this crate's own test modules already rely on (`fork::best_response`,
/// `uriset`).
pub fn invite_request(call_id: &str, to_uri: &str) -> Request {
    RequestBuilder::new(Method::Invite, to_uri)
        .unwrap()
        .from("Alice", "sip:alice@example.com", Some("tag-alice"))
        .to("Bob", to_uri, None)
        .call_id(call_id)
        .cseq(1)
        .via("192.168.1.2:5060", "UDP", Some("z9hG4bK-test"))
        .max_forwards(70)
        .build()
}

pub fn bye_request(call_id: &str, to_uri: &str) -> Request {
    RequestBuilder::new(Method::Bye, to_uri)
        .unwrap()
        .from("Alice", "sip:alice@example.com", Some("tag-alice"))
        .to("Bob", to_uri, Some("tag-bob"))
        .call_id(call_id)
        .cseq(2)
        .via("192.168.1.2:5060", "UDP", Some("z9hG4bK-test-bye"))
        .max_forwards(70)
        .build()
}

pub fn response_for(request: &Request, status: StatusCode) -> Response {
    let mut builder = ResponseBuilder::new(status, None);
    if let Some(from) = request.from() {
        builder = builder.header(TypedHeader::From(from.clone()));
    }
    if let Some(to) = request.to() {
        let mut to = to.clone();
        if to.tag().is_none() {
            to.0.set_tag("tag-bob");
        }
        builder = builder.header(TypedHeader::To(to));
    }
    if let Some(call_id) = request.call_id() {
        builder = builder.header(TypedHeader::CallId(call_id.clone()));
    }
    if let Some(cseq) = request.cseq() {
        builder = builder.cseq(cseq.seq, cseq.method.clone());
    }
    for via in request.via_headers() {
        builder = builder.header(TypedHeader::Via(via));
    }
    builder.build()
}
