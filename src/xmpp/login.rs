//! XMPP 1.0 client stream negotiation.
//!
//! `LoginTask` drives the client half of stream setup: stream start,
//! feature negotiation, optional STARTTLS upgrade, SASL authentication,
//! resource binding and session establishment. Application stanzas produced
//! before the session is live are queued and flushed, in order, on
//! completion.
//!
//! The task is single-shot: after success or failure it performs no further
//! work. TLS and SASL each restart the stream once by design; the state
//! flags (`tls_needed`, `auth_needed`) make further restarts unreachable.

use tracing::{debug, warn};

use crate::consts::XMPP_VERSION;

use super::consts::*;
use super::element::Element;
use super::engine::{LoginEngine, LoginError};
use super::jid::Jid;
use super::sasl::SaslMechanism;

/// Negotiation states, in rough wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Init,
    StreamStartSent,
    StartedXmpp,
    TlsInit,
    TlsRequested,
    AuthInit,
    SaslRunning,
    BindInit,
    BindRequested,
    SessionRequested,
    Done,
}

/// The stream negotiation state machine.
pub struct LoginTask {
    state: LoginState,
    auth_needed: bool,
    stream_id: String,
    iq_id: String,
    full_jid: Option<Jid>,
    features: Option<Element>,
    sasl: Option<Box<dyn SaslMechanism>>,
    current: Option<Element>,
    is_start: bool,
    queued: Vec<Element>,
}

impl LoginTask {
    pub fn new() -> Self {
        Self {
            state: LoginState::Init,
            auth_needed: true,
            stream_id: String::new(),
            iq_id: String::new(),
            full_jid: None,
            features: None,
            sasl: None,
            current: None,
            is_start: false,
            queued: Vec::new(),
        }
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    pub fn done(&self) -> bool {
        self.state == LoginState::Done
    }

    /// Id of the current stream, captured from the server's stream header.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Feed one incoming stanza; `is_start` marks the stream-opening
    /// pseudo-element. Drives the machine as far as it can go.
    pub fn incoming_stanza(
        &mut self,
        engine: &mut dyn LoginEngine,
        element: &Element,
        is_start: bool,
    ) -> bool {
        self.current = Some(element.clone());
        self.is_start = is_start;
        let ok = self.advance(engine);
        self.current = None;
        self.is_start = false;
        ok
    }

    /// Queue an application stanza for delivery once the session is live.
    pub fn outgoing_stanza(&mut self, element: &Element) {
        if self.done() {
            warn!("login already complete; outgoing stanza ignored");
            return;
        }
        self.queued.push(element.clone());
    }

    /// Single-take accessor for the stanza slot.
    fn next_stanza(&mut self) -> Option<Element> {
        self.current.take()
    }

    /// Run state transitions until one needs input that is not available
    /// (yields `true`) or the task finishes. Failure paths yield `false`.
    pub fn advance(&mut self, engine: &mut dyn LoginEngine) -> bool {
        loop {
            debug!(state = ?self.state, "login advance");
            match self.state {
                LoginState::Init => {
                    engine.raise_reset();
                    self.features = None;
                    let domain = engine.user_jid().domain().to_string();
                    engine.send_start(&domain);
                    self.state = LoginState::StreamStartSent;
                }

                LoginState::StreamStartSent => {
                    let Some(element) = self.next_stanza() else {
                        return true;
                    };
                    if !self.is_start || !self.handle_start_stream(&element) {
                        return self.failure(engine, LoginError::Version);
                    }
                    self.state = LoginState::StartedXmpp;
                }

                LoginState::StartedXmpp => {
                    let Some(element) = self.next_stanza() else {
                        return true;
                    };
                    if !element.is_named(&QN_STREAM_FEATURES) {
                        return self.failure(engine, LoginError::Version);
                    }
                    self.features = Some(element);
                    // Use TLS if forced, or if offered.
                    if engine.tls_needed() || self.feature(&QN_TLS_STARTTLS).is_some() {
                        self.state = LoginState::TlsInit;
                    } else if self.auth_needed {
                        self.state = LoginState::AuthInit;
                    } else {
                        self.state = LoginState::BindInit;
                    }
                }

                LoginState::TlsInit => {
                    if self.feature(&QN_TLS_STARTTLS).is_none() {
                        return self.failure(engine, LoginError::Tls);
                    }
                    engine.send_stanza(&Element::new(&QN_TLS_STARTTLS));
                    self.state = LoginState::TlsRequested;
                }

                LoginState::TlsRequested => {
                    let Some(element) = self.next_stanza() else {
                        return true;
                    };
                    if !element.is_named(&QN_TLS_PROCEED) {
                        return self.failure(engine, LoginError::Tls);
                    }
                    let domain = engine.user_jid().domain().to_string();
                    engine.start_tls(&domain);
                    engine.set_tls_needed(false);
                    self.state = LoginState::Init;
                }

                LoginState::AuthInit => {
                    let offered: Vec<String> = match self.feature(&QN_SASL_MECHANISMS) {
                        Some(mechanisms) => mechanisms
                            .children_named(&QN_SASL_MECHANISM)
                            .map(Element::body_text)
                            .collect(),
                        None => return self.failure(engine, LoginError::Auth),
                    };
                    let Some(choice) =
                        engine.choose_sasl_mechanism(&offered, engine.is_encrypted())
                    else {
                        return self.failure(engine, LoginError::Auth);
                    };
                    let Some(mut mechanism) = engine.sasl_mechanism(&choice) else {
                        return self.failure(engine, LoginError::Auth);
                    };
                    let Some(auth) = mechanism.start_auth() else {
                        return self.failure(engine, LoginError::Auth);
                    };
                    self.sasl = Some(mechanism);
                    engine.send_stanza(&auth);
                    self.state = LoginState::SaslRunning;
                }

                LoginState::SaslRunning => {
                    let Some(element) = self.next_stanza() else {
                        return true;
                    };
                    if element.name().ns() != NS_SASL {
                        return self.failure(engine, LoginError::Auth);
                    }
                    if element.is_named(&QN_SASL_CHALLENGE) {
                        let response = self
                            .sasl
                            .as_mut()
                            .and_then(|mechanism| mechanism.handle_challenge(&element));
                        let Some(response) = response else {
                            return self.failure(engine, LoginError::Auth);
                        };
                        engine.send_stanza(&response);
                        continue;
                    }
                    if !element.is_named(&QN_SASL_SUCCESS) {
                        return self.failure(engine, LoginError::Unauthorized);
                    }
                    // Authenticated; restart the stream.
                    self.auth_needed = false;
                    self.state = LoginState::Init;
                }

                LoginState::BindInit => {
                    if self.feature(&QN_BIND).is_none() || self.feature(&QN_SESSION).is_none() {
                        return self.failure(engine, LoginError::Bind);
                    }
                    self.iq_id = engine.next_id();
                    let mut bind = Element::new(&QN_BIND);
                    let resource = engine.requested_resource();
                    if !resource.is_empty() {
                        bind.add_child(Element::new(&QN_BIND_RESOURCE).with_text(resource));
                    }
                    let iq = Element::new(&QN_IQ)
                        .with_attr("type", "set")
                        .with_attr("id", self.iq_id.clone())
                        .with_child(bind);
                    engine.send_stanza(&iq);
                    self.state = LoginState::BindRequested;
                }

                LoginState::BindRequested => {
                    let Some(element) = self.next_stanza() else {
                        return true;
                    };
                    if self.crossed_iq(&element) {
                        return true;
                    }
                    if element.attr("type") != Some("result") {
                        return self.failure(engine, LoginError::Bind);
                    }
                    let jid_text = match element.first_element() {
                        Some(bind) if bind.is_named(&QN_BIND) => bind.text_named(&QN_BIND_JID),
                        _ => return self.failure(engine, LoginError::Bind),
                    };
                    let full = jid_text
                        .as_deref()
                        .and_then(|text| Jid::parse(text).ok())
                        .filter(Jid::is_full);
                    let Some(full) = full else {
                        return self.failure(engine, LoginError::Bind);
                    };
                    self.full_jid = Some(full);

                    // Now request the session.
                    self.iq_id = engine.next_id();
                    let iq = Element::new(&QN_IQ)
                        .with_attr("type", "set")
                        .with_attr("id", self.iq_id.clone())
                        .with_child(Element::new(&QN_SESSION));
                    engine.send_stanza(&iq);
                    self.state = LoginState::SessionRequested;
                }

                LoginState::SessionRequested => {
                    let Some(element) = self.next_stanza() else {
                        return true;
                    };
                    if self.crossed_iq(&element) {
                        return true;
                    }
                    if element.attr("type") != Some("result") {
                        return self.failure(engine, LoginError::Bind);
                    }
                    if let Some(jid) = self.full_jid.clone() {
                        engine.signal_bound(&jid);
                    }
                    self.flush_queued(engine);
                    self.state = LoginState::Done;
                    return true;
                }

                LoginState::Done => return false,
            }
        }
    }

    /// An IQ that is not the answer to our outstanding request: wrong name,
    /// wrong id, or a crossed `get`/`set`. Ignored without a state change.
    fn crossed_iq(&self, element: &Element) -> bool {
        !element.is_named(&QN_IQ)
            || element.attr("id") != Some(self.iq_id.as_str())
            || matches!(element.attr("type"), Some("get") | Some("set"))
    }

    fn handle_start_stream(&mut self, element: &Element) -> bool {
        if !element.is_named(&QN_STREAM) {
            return false;
        }
        if element.attr("xmlns") != Some(NS_CLIENT) {
            return false;
        }
        if element.attr("version") != Some(XMPP_VERSION) {
            return false;
        }
        match element.attr("id") {
            Some(id) if !id.is_empty() => {
                self.stream_id = id.to_string();
                true
            }
            _ => false,
        }
    }

    fn feature(&self, name: &super::element::QName) -> Option<&Element> {
        self.features.as_ref()?.first_named(name)
    }

    fn failure(&mut self, engine: &mut dyn LoginEngine, reason: LoginError) -> bool {
        warn!(?reason, state = ?self.state, "login failed");
        self.state = LoginState::Done;
        engine.signal_error(reason, 0);
        false
    }

    /// Send everything queued before completion, in insertion order.
    fn flush_queued(&mut self, engine: &mut dyn LoginEngine) {
        for stanza in self.queued.drain(..) {
            engine.send_stanza(&stanza);
        }
    }
}

impl Default for LoginTask {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmpp::element::QName;
    use crate::xmpp::sasl::PlainMechanism;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Action {
        Reset,
        Start(String),
        Send(String), // serialized stanza
        StartTls(String),
        Bound(String),
        Error(LoginError, i32),
    }

    struct TestEngine {
        actions: Vec<Action>,
        jid: Jid,
        resource: String,
        tls_needed: bool,
        encrypted: bool,
        next_id: u32,
        challenge_mech: bool,
    }

    impl TestEngine {
        fn new() -> Self {
            Self {
                actions: Vec::new(),
                jid: Jid::parse("foo@example.com").unwrap(),
                resource: "work".into(),
                tls_needed: false,
                encrypted: true,
                next_id: 0,
                challenge_mech: false,
            }
        }

        fn sent(&self) -> Vec<&String> {
            self.actions
                .iter()
                .filter_map(|a| match a {
                    Action::Send(xml) => Some(xml),
                    _ => None,
                })
                .collect()
        }

        fn errors(&self) -> Vec<(LoginError, i32)> {
            self.actions
                .iter()
                .filter_map(|a| match a {
                    Action::Error(reason, cause) => Some((*reason, *cause)),
                    _ => None,
                })
                .collect()
        }

        fn bound(&self) -> Vec<&String> {
            self.actions
                .iter()
                .filter_map(|a| match a {
                    Action::Bound(jid) => Some(jid),
                    _ => None,
                })
                .collect()
        }

        fn count(&self, action: &Action) -> usize {
            self.actions.iter().filter(|a| *a == action).count()
        }
    }

    /// Challenge-echo mechanism for multi-step SASL tests.
    struct EchoMechanism;

    impl SaslMechanism for EchoMechanism {
        fn name(&self) -> &str {
            "ECHO"
        }

        fn start_auth(&mut self) -> Option<Element> {
            Some(Element::new(&QN_SASL_AUTH).with_attr("mechanism", "ECHO"))
        }

        fn handle_challenge(&mut self, challenge: &Element) -> Option<Element> {
            Some(Element::new(&QN_SASL_RESPONSE).with_text(challenge.body_text()))
        }
    }

    impl LoginEngine for TestEngine {
        fn raise_reset(&mut self) {
            self.actions.push(Action::Reset);
        }

        fn send_start(&mut self, domain: &str) {
            self.actions.push(Action::Start(domain.to_string()));
        }

        fn send_stanza(&mut self, stanza: &Element) {
            self.actions.push(Action::Send(stanza.to_xml()));
        }

        fn start_tls(&mut self, domain: &str) {
            self.actions.push(Action::StartTls(domain.to_string()));
        }

        fn next_id(&mut self) -> String {
            self.next_id += 1;
            self.next_id.to_string()
        }

        fn choose_sasl_mechanism(&self, offered: &[String], encrypted: bool) -> Option<String> {
            // PLAIN only over an encrypted transport.
            if self.challenge_mech && offered.iter().any(|m| m == "ECHO") {
                return Some("ECHO".into());
            }
            if encrypted && offered.iter().any(|m| m == MECH_PLAIN) {
                return Some(MECH_PLAIN.into());
            }
            None
        }

        fn sasl_mechanism(&self, name: &str) -> Option<Box<dyn SaslMechanism>> {
            match name {
                MECH_PLAIN => Some(Box::new(PlainMechanism::new("foo", "bar"))),
                "ECHO" => Some(Box::new(EchoMechanism)),
                _ => None,
            }
        }

        fn signal_bound(&mut self, jid: &Jid) {
            self.actions.push(Action::Bound(jid.to_string()));
        }

        fn signal_error(&mut self, reason: LoginError, cause: i32) {
            self.actions.push(Action::Error(reason, cause));
        }

        fn user_jid(&self) -> &Jid {
            &self.jid
        }

        fn tls_needed(&self) -> bool {
            self.tls_needed
        }

        fn set_tls_needed(&mut self, needed: bool) {
            self.tls_needed = needed;
        }

        fn requested_resource(&self) -> &str {
            &self.resource
        }

        fn is_encrypted(&self) -> bool {
            self.encrypted
        }
    }

    fn stream_start(id: &str) -> Element {
        Element::new(&QN_STREAM)
            .with_attr("xmlns", NS_CLIENT)
            .with_attr("version", "1.0")
            .with_attr("id", id)
    }

    fn mechanisms(names: &[&str]) -> Element {
        let mut mechanisms = Element::new(&QN_SASL_MECHANISMS);
        for name in names {
            mechanisms.add_child(Element::new(&QN_SASL_MECHANISM).with_text(*name));
        }
        mechanisms
    }

    fn features(children: Vec<Element>) -> Element {
        let mut features = Element::new(&QN_STREAM_FEATURES);
        for child in children {
            features.add_child(child);
        }
        features
    }

    fn bind_session_features() -> Element {
        features(vec![Element::new(&QN_BIND), Element::new(&QN_SESSION)])
    }

    fn iq_result(id: &str) -> Element {
        Element::new(&QN_IQ)
            .with_attr("type", "result")
            .with_attr("id", id)
    }

    fn bind_result(id: &str, jid: &str) -> Element {
        iq_result(id).with_child(
            Element::new(&QN_BIND).with_child(Element::new(&QN_BIND_JID).with_text(jid)),
        )
    }

    /// Run the post-authentication half: restart, features, bind, session.
    fn run_bind_session(task: &mut LoginTask, engine: &mut TestEngine, stream: &str) {
        assert!(task.incoming_stanza(engine, &stream_start(stream), true));
        assert!(task.incoming_stanza(engine, &bind_session_features(), false));
        assert_eq!(task.state(), LoginState::BindRequested);
        assert!(task.incoming_stanza(engine, &bind_result("1", "foo@example.com/work"), false));
        assert_eq!(task.state(), LoginState::SessionRequested);
        assert!(task.incoming_stanza(engine, &iq_result("2"), false));
    }

    #[test]
    fn test_happy_path_plain_over_encrypted_transport() {
        let mut engine = TestEngine::new();
        let mut task = LoginTask::new();

        assert!(task.advance(&mut engine));
        assert_eq!(task.state(), LoginState::StreamStartSent);
        assert_eq!(engine.count(&Action::Reset), 1);
        assert_eq!(engine.count(&Action::Start("example.com".into())), 1);

        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        assert_eq!(task.state(), LoginState::StartedXmpp);
        assert_eq!(task.stream_id(), "s-1");

        let offer = features(vec![
            mechanisms(&[MECH_PLAIN]),
            Element::new(&QN_BIND),
            Element::new(&QN_SESSION),
        ]);
        assert!(task.incoming_stanza(&mut engine, &offer, false));
        assert_eq!(task.state(), LoginState::SaslRunning);
        assert!(engine.sent()[0].contains("AGZvbwBiYXI="));

        // Success restarts the stream inside the same advance.
        let success = Element::new(&QN_SASL_SUCCESS);
        assert!(task.incoming_stanza(&mut engine, &success, false));
        assert_eq!(task.state(), LoginState::StreamStartSent);
        assert_eq!(engine.count(&Action::Reset), 2);

        // A stanza produced by the application before the session is live
        // is queued, not sent.
        let presence = Element::new(&QName::new(NS_CLIENT, "presence"));
        task.outgoing_stanza(&presence);
        let sent_before = engine.sent().len();

        run_bind_session(&mut task, &mut engine, "s-2");
        assert!(task.done());
        assert_eq!(task.stream_id(), "s-2");
        assert_eq!(engine.bound(), vec!["foo@example.com/work"]);
        assert!(engine.errors().is_empty());

        // bind iq, session iq, then the queued presence, in that order.
        let sent = engine.sent();
        assert_eq!(sent.len(), sent_before + 3);
        assert!(sent[sent.len() - 3].contains("<resource>work</resource>"));
        assert!(sent[sent.len() - 2].contains("<session"));
        assert!(sent[sent.len() - 1].contains("<presence"));
    }

    #[test]
    fn test_queued_stanzas_flush_in_fifo_order() {
        let mut engine = TestEngine::new();
        let mut task = LoginTask::new();
        task.advance(&mut engine);

        for i in 0..3 {
            let msg = Element::new(&QName::new(NS_CLIENT, "message"))
                .with_attr("id", format!("m{i}"));
            task.outgoing_stanza(&msg);
        }

        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        let offer = features(vec![
            mechanisms(&[MECH_PLAIN]),
            Element::new(&QN_BIND),
            Element::new(&QN_SESSION),
        ]);
        assert!(task.incoming_stanza(&mut engine, &offer, false));
        assert!(task.incoming_stanza(&mut engine, &Element::new(&QN_SASL_SUCCESS), false));
        run_bind_session(&mut task, &mut engine, "s-2");

        let sent = engine.sent();
        let tail: Vec<_> = sent[sent.len() - 3..].to_vec();
        assert!(tail[0].contains("m0"));
        assert!(tail[1].contains("m1"));
        assert!(tail[2].contains("m2"));
    }

    #[test]
    fn test_starttls_upgrade_restarts_stream() {
        let mut engine = TestEngine::new();
        engine.tls_needed = true;
        engine.encrypted = false;
        let mut task = LoginTask::new();
        task.advance(&mut engine);

        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        let offer = features(vec![Element::new(&QN_TLS_STARTTLS), mechanisms(&[MECH_PLAIN])]);
        assert!(task.incoming_stanza(&mut engine, &offer, false));
        assert_eq!(task.state(), LoginState::TlsRequested);
        assert!(engine.sent()[0].starts_with("<starttls"));

        let proceed = Element::new(&QN_TLS_PROCEED);
        assert!(task.incoming_stanza(&mut engine, &proceed, false));
        assert_eq!(engine.count(&Action::StartTls("example.com".into())), 1);
        assert!(!engine.tls_needed);
        // Fresh stream after the upgrade.
        assert_eq!(task.state(), LoginState::StreamStartSent);
        assert_eq!(engine.count(&Action::Reset), 2);
    }

    #[test]
    fn test_opportunistic_starttls_when_not_required() {
        let mut engine = TestEngine::new();
        engine.tls_needed = false;
        engine.encrypted = false;
        let mut task = LoginTask::new();
        task.advance(&mut engine);

        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        let offer = features(vec![Element::new(&QN_TLS_STARTTLS), mechanisms(&[MECH_PLAIN])]);
        assert!(task.incoming_stanza(&mut engine, &offer, false));
        // Offered TLS is taken even though it was not required.
        assert_eq!(task.state(), LoginState::TlsRequested);
    }

    #[test]
    fn test_tls_required_but_not_offered() {
        let mut engine = TestEngine::new();
        engine.tls_needed = true;
        let mut task = LoginTask::new();
        task.advance(&mut engine);

        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        let offer = features(vec![mechanisms(&[MECH_PLAIN])]);
        assert!(!task.incoming_stanza(&mut engine, &offer, false));
        assert_eq!(engine.errors(), vec![(LoginError::Tls, 0)]);
        assert!(task.done());
    }

    #[test]
    fn test_tls_rejected_by_server() {
        let mut engine = TestEngine::new();
        engine.tls_needed = true;
        let mut task = LoginTask::new();
        task.advance(&mut engine);

        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        let offer = features(vec![Element::new(&QN_TLS_STARTTLS)]);
        assert!(task.incoming_stanza(&mut engine, &offer, false));
        let refusal = Element::new(&QN_TLS_FAILURE);
        assert!(!task.incoming_stanza(&mut engine, &refusal, false));
        assert_eq!(engine.errors(), vec![(LoginError::Tls, 0)]);
    }

    #[test]
    fn test_stream_header_validation() {
        // Wrong version
        let mut engine = TestEngine::new();
        let mut task = LoginTask::new();
        task.advance(&mut engine);
        let bad = stream_start("s-1").with_attr("version", "0.9");
        assert!(!task.incoming_stanza(&mut engine, &bad, true));
        assert_eq!(engine.errors(), vec![(LoginError::Version, 0)]);

        // Missing id
        let mut engine = TestEngine::new();
        let mut task = LoginTask::new();
        task.advance(&mut engine);
        let bad = Element::new(&QN_STREAM)
            .with_attr("xmlns", NS_CLIENT)
            .with_attr("version", "1.0");
        assert!(!task.incoming_stanza(&mut engine, &bad, true));
        assert_eq!(engine.errors(), vec![(LoginError::Version, 0)]);

        // Not flagged as a stream start
        let mut engine = TestEngine::new();
        let mut task = LoginTask::new();
        task.advance(&mut engine);
        assert!(!task.incoming_stanza(&mut engine, &stream_start("s-1"), false));
        assert_eq!(engine.errors(), vec![(LoginError::Version, 0)]);
    }

    #[test]
    fn test_challenge_response_then_rejection() {
        let mut engine = TestEngine::new();
        engine.challenge_mech = true;
        let mut task = LoginTask::new();
        task.advance(&mut engine);

        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        let offer = features(vec![mechanisms(&["ECHO"])]);
        assert!(task.incoming_stanza(&mut engine, &offer, false));
        assert_eq!(task.state(), LoginState::SaslRunning);

        let challenge = Element::new(&QN_SASL_CHALLENGE).with_text("c29tZS1ub25jZQ==");
        assert!(task.incoming_stanza(&mut engine, &challenge, false));
        assert_eq!(task.state(), LoginState::SaslRunning);
        assert!(engine
            .sent()
            .last()
            .unwrap()
            .contains("c29tZS1ub25jZQ=="));

        let rejection = Element::new(&QN_SASL_FAILURE);
        assert!(!task.incoming_stanza(&mut engine, &rejection, false));
        assert_eq!(engine.errors(), vec![(LoginError::Unauthorized, 0)]);
        assert!(task.done());

        // Single-shot: nothing more happens after failure.
        assert!(!task.incoming_stanza(&mut engine, &Element::new(&QN_SASL_SUCCESS), false));
        assert_eq!(engine.errors().len(), 1);
    }

    #[test]
    fn test_auth_failures() {
        // No mechanisms offered at all
        let mut engine = TestEngine::new();
        let mut task = LoginTask::new();
        task.advance(&mut engine);
        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        assert!(!task.incoming_stanza(&mut engine, &features(vec![]), false));
        assert_eq!(engine.errors(), vec![(LoginError::Auth, 0)]);

        // No acceptable choice (PLAIN refused over plaintext)
        let mut engine = TestEngine::new();
        engine.encrypted = false;
        let mut task = LoginTask::new();
        task.advance(&mut engine);
        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        let offer = features(vec![mechanisms(&[MECH_PLAIN])]);
        assert!(!task.incoming_stanza(&mut engine, &offer, false));
        assert_eq!(engine.errors(), vec![(LoginError::Auth, 0)]);

        // An element outside the SASL namespace mid-auth fails the login
        let mut engine = TestEngine::new();
        let mut task = LoginTask::new();
        task.advance(&mut engine);
        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        let offer = features(vec![mechanisms(&[MECH_PLAIN])]);
        assert!(task.incoming_stanza(&mut engine, &offer, false));
        assert_eq!(task.state(), LoginState::SaslRunning);
        let stray = Element::new(&QN_IQ).with_attr("type", "get");
        assert!(!task.incoming_stanza(&mut engine, &stray, false));
        assert_eq!(engine.errors(), vec![(LoginError::Auth, 0)]);
    }

    #[test]
    fn test_bind_result_without_bind_child() {
        let mut engine = TestEngine::new();
        engine.jid = Jid::parse("foo@example.com").unwrap();
        let mut task = LoginTask::new();
        task.auth_needed = false;
        task.advance(&mut engine);

        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        assert!(task.incoming_stanza(&mut engine, &bind_session_features(), false));
        assert_eq!(task.state(), LoginState::BindRequested);

        assert!(!task.incoming_stanza(&mut engine, &iq_result("1"), false));
        assert_eq!(engine.errors(), vec![(LoginError::Bind, 0)]);
    }

    #[test]
    fn test_bind_rejects_bare_jid() {
        let mut engine = TestEngine::new();
        let mut task = LoginTask::new();
        task.auth_needed = false;
        task.advance(&mut engine);

        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        assert!(task.incoming_stanza(&mut engine, &bind_session_features(), false));
        assert!(!task.incoming_stanza(&mut engine, &bind_result("1", "foo@example.com"), false));
        assert_eq!(engine.errors(), vec![(LoginError::Bind, 0)]);
    }

    #[test]
    fn test_bind_requires_both_features() {
        let mut engine = TestEngine::new();
        let mut task = LoginTask::new();
        task.auth_needed = false;
        task.advance(&mut engine);

        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        let only_bind = features(vec![Element::new(&QN_BIND)]);
        assert!(!task.incoming_stanza(&mut engine, &only_bind, false));
        assert_eq!(engine.errors(), vec![(LoginError::Bind, 0)]);
    }

    #[test]
    fn test_crossed_iqs_are_ignored_in_both_request_states() {
        let mut engine = TestEngine::new();
        let mut task = LoginTask::new();
        task.auth_needed = false;
        task.advance(&mut engine);

        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        assert!(task.incoming_stanza(&mut engine, &bind_session_features(), false));
        assert_eq!(task.state(), LoginState::BindRequested);

        // Matching id but a crossed set; then a mismatched id result.
        let crossed = Element::new(&QN_IQ).with_attr("type", "set").with_attr("id", "1");
        assert!(task.incoming_stanza(&mut engine, &crossed, false));
        assert_eq!(task.state(), LoginState::BindRequested);
        let mismatched = iq_result("99");
        assert!(task.incoming_stanza(&mut engine, &mismatched, false));
        assert_eq!(task.state(), LoginState::BindRequested);

        assert!(task.incoming_stanza(&mut engine, &bind_result("1", "foo@example.com/work"), false));
        assert_eq!(task.state(), LoginState::SessionRequested);

        // Same ignore rule while the session request is outstanding.
        let crossed = Element::new(&QN_IQ).with_attr("type", "get").with_attr("id", "2");
        assert!(task.incoming_stanza(&mut engine, &crossed, false));
        assert_eq!(task.state(), LoginState::SessionRequested);

        assert!(task.incoming_stanza(&mut engine, &iq_result("2"), false));
        assert!(task.done());
        assert!(engine.errors().is_empty());
    }

    #[test]
    fn test_session_error_reports_bind_failure() {
        let mut engine = TestEngine::new();
        let mut task = LoginTask::new();
        task.auth_needed = false;
        task.advance(&mut engine);

        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        assert!(task.incoming_stanza(&mut engine, &bind_session_features(), false));
        assert!(task.incoming_stanza(&mut engine, &bind_result("1", "foo@example.com/work"), false));

        let error = Element::new(&QN_IQ).with_attr("type", "error").with_attr("id", "2");
        assert!(!task.incoming_stanza(&mut engine, &error, false));
        assert_eq!(engine.errors(), vec![(LoginError::Bind, 0)]);
    }

    #[test]
    fn test_queued_stanzas_dropped_when_task_dropped_early() {
        let mut engine = TestEngine::new();
        let mut task = LoginTask::new();
        task.advance(&mut engine);

        let msg = Element::new(&QName::new(NS_CLIENT, "message")).with_attr("id", "m0");
        task.outgoing_stanza(&msg);
        let sent_before = engine.sent().len();
        drop(task);
        assert_eq!(engine.sent().len(), sent_before);
    }

    #[test]
    fn test_no_resource_requested_omits_resource_child() {
        let mut engine = TestEngine::new();
        engine.resource = String::new();
        let mut task = LoginTask::new();
        task.auth_needed = false;
        task.advance(&mut engine);

        assert!(task.incoming_stanza(&mut engine, &stream_start("s-1"), true));
        assert!(task.incoming_stanza(&mut engine, &bind_session_features(), false));
        let bind_iq = engine.sent().last().unwrap().to_string();
        assert!(bind_iq.contains("<bind"));
        assert!(!bind_iq.contains("<resource"));
    }
}
