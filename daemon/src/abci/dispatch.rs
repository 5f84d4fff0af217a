//! Request dispatch.
//!
//! Maps each inbound request variant to its handler and wraps the result in
//! the matching response variant. Unknown variants get an `exception`
//! response and the connection stays alive. Errors returned from here are
//! the fatal kind: a consensus-critical handler (init_chain, finalize,
//! commit) failed, and the process must stop without committing.

use log::error;

use super::proto::{Request, RequestValue, Response, ResponseFlush, ResponseValue};
use crate::core::{app::App, error::ChainError};

pub struct Dispatcher {
    app: App,
}

impl Dispatcher {
    pub fn new(app: App) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut App {
        &mut self.app
    }

    /// Handle one request, producing exactly one response.
    pub fn handle(&mut self, request: Request) -> Result<Response, ChainError> {
        let Some(value) = request.value else {
            return Ok(Response::exception("ABCI request not found"));
        };

        let response = match value {
            RequestValue::Echo(req) => ResponseValue::Echo(self.app.echo(req)),
            RequestValue::Flush(_) => ResponseValue::Flush(ResponseFlush {}),
            RequestValue::Info(_) => ResponseValue::Info(self.app.info()),
            RequestValue::InitChain(req) => {
                ResponseValue::InitChain(self.app.init_chain(req).inspect_err(|e| {
                    error!("init_chain failed: {}", e);
                })?)
            }
            RequestValue::Query(req) => ResponseValue::Query(self.app.query(req)),
            RequestValue::CheckTx(req) => ResponseValue::CheckTx(self.app.check_tx(req)),
            RequestValue::PrepareProposal(req) => {
                ResponseValue::PrepareProposal(self.app.prepare_proposal(req))
            }
            RequestValue::ProcessProposal(req) => {
                ResponseValue::ProcessProposal(self.app.process_proposal(req))
            }
            RequestValue::FinalizeBlock(req) => {
                ResponseValue::FinalizeBlock(self.app.finalize_block(req).inspect_err(|e| {
                    error!("finalize_block failed, aborting without commit: {}", e);
                })?)
            }
            RequestValue::Commit(_) => ResponseValue::Commit(self.app.commit().inspect_err(|e| {
                error!("commit failed, aborting: {}", e);
            })?),
            RequestValue::ListSnapshots(_) => {
                ResponseValue::ListSnapshots(self.app.list_snapshots())
            }
            RequestValue::OfferSnapshot(req) => {
                ResponseValue::OfferSnapshot(self.app.offer_snapshot(req))
            }
            RequestValue::LoadSnapshotChunk(req) => {
                ResponseValue::LoadSnapshotChunk(self.app.load_snapshot_chunk(req))
            }
            RequestValue::ApplySnapshotChunk(req) => {
                ResponseValue::ApplySnapshotChunk(self.app.apply_snapshot_chunk(req))
            }
        };

        Ok(Response::from_value(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abci::proto::{RequestEcho, RequestQuery};
    use crate::config::NodeConfig;
    use crate::core::storage::StateStore;

    fn dispatcher() -> Dispatcher {
        let home = std::env::temp_dir().join(format!("kura_dispatch_{}", std::process::id()));
        std::fs::create_dir_all(&home).unwrap();
        let config = NodeConfig::for_tests("kura-test", &home);
        Dispatcher::new(App::with_store(config, StateStore::temporary().unwrap()).unwrap())
    }

    #[test]
    fn test_unknown_variant_becomes_exception() {
        let mut d = dispatcher();
        let response = d.handle(Request { value: None }).unwrap();
        match response.value {
            Some(ResponseValue::Exception(e)) => {
                assert_eq!(e.error, "ABCI request not found");
            }
            other => panic!("expected exception, got {:?}", other.is_some()),
        }
    }

    #[test]
    fn test_echo_round_trip() {
        let mut d = dispatcher();
        let response = d
            .handle(Request {
                value: Some(RequestValue::Echo(RequestEcho {
                    message: "ping".into(),
                })),
            })
            .unwrap();
        assert!(matches!(
            response.value,
            Some(ResponseValue::Echo(e)) if e.message == "ping"
        ));
    }

    #[test]
    fn test_flush_answers_flush() {
        let mut d = dispatcher();
        let response = d
            .handle(Request {
                value: Some(RequestValue::Flush(Default::default())),
            })
            .unwrap();
        assert!(matches!(response.value, Some(ResponseValue::Flush(_))));
    }

    #[test]
    fn test_query_routes() {
        let mut d = dispatcher();
        let response = d
            .handle(Request {
                value: Some(RequestValue::Query(RequestQuery {
                    data: vec![],
                    path: "/ping".into(),
                    height: 0,
                })),
            })
            .unwrap();
        match response.value {
            Some(ResponseValue::Query(q)) => {
                assert_eq!(q.code, 0);
                assert!(String::from_utf8_lossy(&q.value).contains("online"));
            }
            _ => panic!("expected query response"),
        }
    }
}
