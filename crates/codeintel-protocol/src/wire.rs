use crate::error::RpcError;
use crate::ops::Op;
use serde::{Deserialize, Serialize};

/// One request frame: `{id, op, args}` (the `op`/`args` pair is flattened
/// from [`Op`]'s own tagging).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(flatten)]
    pub op: Op,
}

/// One response frame: `{id, ok, value|error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    #[must_use]
    pub fn ok(id: u64, value: serde_json::Value) -> Self {
        Self {
            id,
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    #[must_use]
    pub fn err(id: u64, error: RpcError) -> Self {
        Self {
            id,
            ok: false,
            value: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{BeginResult, ExecuteArgs};
    use pretty_assertions::assert_eq;

    #[test]
    fn request_round_trips_through_json() {
        let req = Request {
            id: 7,
            op: Op::Execute(ExecuteArgs {
                sql: "INSERT INTO files (relative_path) VALUES (?1)".into(),
                params: vec![crate::raw::RawValue::Text("m.py".into())],
                tx: None,
            }),
        };
        let encoded = serde_json::to_string(&req).unwrap();
        let decoded: Request = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, 7);
        match decoded.op {
            Op::Execute(args) => assert_eq!(args.sql, req_sql()),
            other => panic!("unexpected op decoded: {other:?}"),
        }
    }

    fn req_sql() -> String {
        "INSERT INTO files (relative_path) VALUES (?1)".into()
    }

    #[test]
    fn response_value_round_trips() {
        let resp = Response::ok(1, serde_json::to_value(BeginResult { tx_id: 42 }).unwrap());
        let encoded = serde_json::to_string(&resp).unwrap();
        let decoded: Response = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.ok);
        let begin: BeginResult = serde_json::from_value(decoded.value.unwrap()).unwrap();
        assert_eq!(begin.tx_id, 42);
    }
}
