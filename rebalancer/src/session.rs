//! Line-delimited JSON request loop.
//!
//! Each non-blank input line is one request, tagged by `op`:
//!
//! ```text
//! {"op": "create", "user_id": "u1", "allocation": {"stocks": 60, "bonds": 40}}
//! {"op": "show", "user_id": "u1"}
//! {"op": "rebalance", "user_id": "u1", "new_allocation": {"stocks": 70, "bonds": 30}}
//! {"op": "history", "user_id": "u1"}
//! ```
//!
//! Every request gets exactly one response line, either `{"ok": ...}` or
//! `{"error": "...", "client_error": bool}`. A failed request never ends the
//! session; only input EOF or an output error does.

use log::{debug, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::orchestrator::RebalanceService;
use crate::portfolio::{CreatePortfolioRequest, RebalanceRequest};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Create(CreatePortfolioRequest),
    Show { user_id: String },
    Rebalance(RebalanceRequest),
    History { user_id: String },
}

/// Run one request against the service.
pub async fn dispatch(svc: &RebalanceService, request: Request) -> Result<Value> {
    let value = match request {
        Request::Create(req) => serde_json::to_value(svc.create_portfolio(req).await?)?,
        Request::Show { user_id } => serde_json::to_value(svc.get_portfolio(&user_id).await?)?,
        Request::Rebalance(req) => serde_json::to_value(svc.rebalance(req).await?)?,
        Request::History { user_id } => {
            serde_json::to_value(svc.transactions(&user_id).await?)?
        }
    };
    Ok(value)
}

fn error_reply(err: &Error) -> Value {
    json!({ "error": err.to_string(), "client_error": err.is_client_error() })
}

/// Answer requests from `input` on `output` until EOF. Returns how many
/// requests were answered.
pub async fn serve<R, W>(svc: &RebalanceService, input: R, mut output: W) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut answered = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                debug!("Request: {request:?}");
                match dispatch(svc, request).await {
                    Ok(value) => json!({ "ok": value }),
                    Err(e) => {
                        warn!("Request failed: {e}");
                        error_reply(&e)
                    }
                }
            }
            Err(e) => error_reply(&Error::InvalidRequest(format!("invalid request: {e}"))),
        };

        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        output.write_all(&out).await?;
        output.flush().await?;
        answered += 1;
    }

    Ok(answered)
}
