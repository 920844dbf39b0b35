// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Connection state machine (C10): one instance per accepted TCP stream,
//! advancing `Unauthenticated -> Bound(DN) -> Closing` per the transition
//! table in §4.10.

use tracing::debug;

use crate::ber::controls::{is_known_control, paged_results_done_control, PAGED_RESULTS_OID};
use crate::ber::filter::contains_unsupported;
use crate::ber::message::{
    encode_generic_error, AuthChoice, BindRequest, LdapMessage, LdapResult, ProtocolOp, ResultCode,
    SearchRequest,
};
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::search;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Bound(String),
    Closing,
}

pub struct Connection {
    state: ConnectionState,
}

/// What the caller should do with the produced response bytes.
pub enum Outcome {
    /// Send these messages, keep the connection open.
    Reply(Vec<LdapMessage>),
    /// Send this pre-encoded PDU as-is (used for the generic error response
    /// to a PDU type this core has no structured response for) and keep
    /// the connection open.
    ReplyRaw(Vec<u8>),
    /// Unbind: close with no response at all.
    CloseSilently,
}

impl Connection {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Unauthenticated,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Dispatch one decoded message and produce the response(s).
    pub fn handle(&mut self, ctx: &AppContext, msg: &LdapMessage) -> Outcome {
        if self.state == ConnectionState::Closing {
            return Outcome::CloseSilently;
        }

        for control in &msg.controls {
            if control.criticality && !is_known_control(&control.control_type) {
                let result = LdapResult::with_message(
                    ResultCode::UnavailableCriticalExtension,
                    format!("unsupported critical control {}", control.control_type),
                );
                let op = match &msg.op {
                    ProtocolOp::SearchRequest(_) => ProtocolOp::SearchResultDone(result),
                    _ => ProtocolOp::BindResponse(result),
                };
                return Outcome::Reply(vec![response(msg.message_id, op)]);
            }
        }

        match &msg.op {
            ProtocolOp::BindRequest(req) => self.handle_bind(ctx, msg.message_id, req),
            ProtocolOp::SearchRequest(req) => self.handle_search(ctx, msg.message_id, req, &msg.controls),
            ProtocolOp::UnbindRequest => {
                self.state = ConnectionState::Closing;
                Outcome::CloseSilently
            }
            // Response PDUs are never sent by a client, and `Other` covers
            // every request tag this core doesn't implement; both get the
            // generic protocolError PDU on the same messageID (§4.10).
            ProtocolOp::BindResponse(_)
            | ProtocolOp::SearchResultEntry(_)
            | ProtocolOp::SearchResultDone(_)
            | ProtocolOp::Other(_) => Outcome::ReplyRaw(encode_generic_error(
                msg.message_id,
                &LdapResult::code(ResultCode::ProtocolError),
            )),
        }
    }

    fn handle_bind(&mut self, ctx: &AppContext, message_id: i64, req: &BindRequest) -> Outcome {
        let result = match &req.authentication {
            AuthChoice::Sasl => LdapResult::code(ResultCode::AuthMethodNotSupported),
            AuthChoice::Simple(password) => self.evaluate_simple_bind(&ctx.config, &req.name, password),
        };
        if result.result_code == ResultCode::Success {
            self.state = ConnectionState::Bound(req.name.clone());
        }
        Outcome::Reply(vec![response(message_id, ProtocolOp::BindResponse(result))])
    }

    /// Never distinguishes unknown DN, wrong password, or inactive account
    /// in its failure result — all collapse to `invalidCredentials` (§4.10
    /// privacy rule). Bind is evaluated only against the configured
    /// service-account credentials; it never reaches the IdP.
    fn evaluate_simple_bind(&self, config: &AppConfig, dn: &str, password: &[u8]) -> LdapResult {
        if dn.is_empty() && password.is_empty() {
            return if config.allow_anonymous_bind {
                LdapResult::success()
            } else {
                LdapResult::code(ResultCode::InsufficientAccessRights)
            };
        }
        match (&config.ldap_bind_dn, &config.ldap_bind_password) {
            (Some(bind_dn), Some(bind_password))
                if crate::dn::dn_eq(dn, bind_dn) && password == bind_password.as_bytes() =>
            {
                LdapResult::success()
            }
            _ => LdapResult::code(ResultCode::InvalidCredentials),
        }
    }

    fn handle_search(
        &mut self,
        ctx: &AppContext,
        message_id: i64,
        req: &SearchRequest,
        controls: &[crate::ber::controls::Control],
    ) -> Outcome {
        let service_account_configured = ctx.config.ldap_bind_dn.is_some();
        if self.state == ConnectionState::Unauthenticated
            && service_account_configured
            && !ctx.config.allow_anonymous_bind
        {
            let result = LdapResult::code(ResultCode::InsufficientAccessRights);
            return Outcome::Reply(vec![response(message_id, ProtocolOp::SearchResultDone(result))]);
        }

        if contains_unsupported(&req.filter) {
            let result = LdapResult::with_message(ResultCode::UnwillingToPerform, "extensibleMatch is not supported");
            return Outcome::Reply(vec![response(message_id, ProtocolOp::SearchResultDone(result))]);
        }

        let Some(snapshot) = ctx.current_snapshot() else {
            let result = LdapResult::with_message(ResultCode::Unavailable, "no snapshot published yet");
            return Outcome::Reply(vec![response(message_id, ProtocolOp::SearchResultDone(result))]);
        };

        let outcome = search::execute(&snapshot, &ctx.config, req);
        ctx.metrics.search_completed();
        debug!(entries = outcome.entries.len(), "search completed");

        let mut messages: Vec<LdapMessage> = outcome
            .entries
            .into_iter()
            .map(|entry| LdapMessage {
                message_id,
                op: ProtocolOp::SearchResultEntry(entry),
                controls: Vec::new(),
            })
            .collect();

        let mut done_controls = Vec::new();
        if controls.iter().any(|c| c.control_type == PAGED_RESULTS_OID) {
            done_controls.push(paged_results_done_control());
        }
        messages.push(LdapMessage {
            message_id,
            op: ProtocolOp::SearchResultDone(outcome.done),
            controls: done_controls,
        });
        Outcome::Reply(messages)
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

fn response(message_id: i64, op: ProtocolOp) -> LdapMessage {
    LdapMessage {
        message_id,
        op,
        controls: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::filter::Filter;
    use crate::ber::message::SearchScope;

    fn config() -> AppConfig {
        AppConfig {
            idp_base_url: "https://idp.example.com".into(),
            idp_client_id: "c".into(),
            idp_client_secret: "s".into(),
            idp_realm: Some("main".into()),
            ldap_base_dn: "dc=example,dc=com".into(),
            allow_anonymous_bind: true,
            ..Default::default()
        }
    }

    async fn context() -> std::sync::Arc<AppContext> {
        AppContext::new(config()).await.unwrap()
    }

    #[tokio::test]
    async fn anonymous_bind_succeeds_when_allowed() {
        let ctx = context().await;
        let mut conn = Connection::new();
        let req = BindRequest {
            version: 3,
            name: String::new(),
            authentication: AuthChoice::Simple(Vec::new()),
        };
        match conn.handle(&ctx, &LdapMessage { message_id: 1, op: ProtocolOp::BindRequest(req), controls: vec![] }) {
            Outcome::Reply(msgs) => match &msgs[0].op {
                ProtocolOp::BindResponse(r) => assert_eq!(r.result_code, ResultCode::Success),
                _ => panic!("expected bind response"),
            },
            _ => panic!("expected reply"),
        }
        assert_eq!(*conn.state(), ConnectionState::Bound(String::new()));
    }

    #[tokio::test]
    async fn sasl_bind_rejected_as_unsupported() {
        let ctx = context().await;
        let mut conn = Connection::new();
        let req = BindRequest {
            version: 3,
            name: "anything".into(),
            authentication: AuthChoice::Sasl,
        };
        match conn.handle(&ctx, &LdapMessage { message_id: 2, op: ProtocolOp::BindRequest(req), controls: vec![] }) {
            Outcome::Reply(msgs) => match &msgs[0].op {
                ProtocolOp::BindResponse(r) => assert_eq!(r.result_code, ResultCode::AuthMethodNotSupported),
                _ => panic!("expected bind response"),
            },
            _ => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_dn_both_report_invalid_credentials() {
        let mut cfg = config();
        cfg.ldap_bind_dn = Some("cn=svc,dc=example,dc=com".into());
        cfg.ldap_bind_password = Some("correct".into());
        let ctx = AppContext::new(cfg).await.unwrap();

        let mut conn = Connection::new();
        let wrong_password = BindRequest {
            version: 3,
            name: "cn=svc,dc=example,dc=com".into(),
            authentication: AuthChoice::Simple(b"wrong".to_vec()),
        };
        let r1 = match conn.handle(&ctx, &LdapMessage { message_id: 1, op: ProtocolOp::BindRequest(wrong_password), controls: vec![] }) {
            Outcome::Reply(msgs) => match msgs[0].op.clone() {
                ProtocolOp::BindResponse(r) => r.result_code,
                _ => panic!("expected bind response"),
            },
            _ => panic!("expected reply"),
        };
        let unknown_dn = BindRequest {
            version: 3,
            name: "cn=nobody,dc=example,dc=com".into(),
            authentication: AuthChoice::Simple(b"correct".to_vec()),
        };
        let r2 = match conn.handle(&ctx, &LdapMessage { message_id: 2, op: ProtocolOp::BindRequest(unknown_dn), controls: vec![] }) {
            Outcome::Reply(msgs) => match msgs[0].op.clone() {
                ProtocolOp::BindResponse(r) => r.result_code,
                _ => panic!("expected bind response"),
            },
            _ => panic!("expected reply"),
        };
        assert_eq!(r1, ResultCode::InvalidCredentials);
        assert_eq!(r2, ResultCode::InvalidCredentials);
    }

    #[tokio::test]
    async fn unbind_closes_silently() {
        let ctx = context().await;
        let mut conn = Connection::new();
        match conn.handle(&ctx, &LdapMessage { message_id: 3, op: ProtocolOp::UnbindRequest, controls: vec![] }) {
            Outcome::CloseSilently => {}
            _ => panic!("expected silent close"),
        }
        assert_eq!(*conn.state(), ConnectionState::Closing);
    }

    #[tokio::test]
    async fn search_without_snapshot_reports_unavailable() {
        let ctx = context().await;
        let mut conn = Connection::new();
        let req = SearchRequest {
            base_object: String::new(),
            scope: SearchScope::BaseObject,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter: Filter::Present("objectClass".into()),
            attributes: Vec::new(),
        };
        match conn.handle(&ctx, &LdapMessage { message_id: 4, op: ProtocolOp::SearchRequest(req), controls: vec![] }) {
            Outcome::Reply(msgs) => match &msgs[0].op {
                ProtocolOp::SearchResultDone(r) => assert_eq!(r.result_code, ResultCode::Unavailable),
                _ => panic!("expected search result done"),
            },
            _ => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn unrecognized_pdu_yields_protocol_error() {
        let ctx = context().await;
        let mut conn = Connection::new();
        match conn.handle(&ctx, &LdapMessage { message_id: 5, op: ProtocolOp::Other(0x77), controls: vec![] }) {
            Outcome::ReplyRaw(bytes) => assert!(!bytes.is_empty()),
            _ => panic!("expected a raw protocol-error reply"),
        }
    }
}
