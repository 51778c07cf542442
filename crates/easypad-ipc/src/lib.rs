//! JSON-lines envelope for driving virtual gamepads from another process.
//!
//! One request object per line in, one response object per line out.
//!
//! ```text
//! {"cmd":"create"}                         -> {"status":"created","id":1}
//! {"cmd":"button_down","id":1,"index":0}   -> {"status":"bool","value":true}
//! ```

use anyhow::{bail, Context, Result};
use easypad_protocol::{DeviceId, GamepadState};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    IsSupported,
    Install,
    Create,
    List,
    ButtonDown { id: DeviceId, index: i64 },
    ButtonUp { id: DeviceId, index: i64 },
    SetAxis { id: DeviceId, index: i64, value: i16 },
    Destroy { id: DeviceId },
    IsActive { id: DeviceId },
    State { id: DeviceId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Created { id: DeviceId },
    Bool { value: bool },
    Ids { ids: Vec<DeviceId> },
    State { id: DeviceId, state: GamepadState },
    Err { message: String },
}

impl Response {
    pub fn err(message: impl Into<String>) -> Self {
        Response::Err { message: message.into() }
    }
}

/// Read one JSON frame; `Ok(None)` on a clean EOF.
pub async fn read_json_opt<T, R>(reader: &mut R) -> Result<Option<T>>
where
    T: for<'de> Deserialize<'de>,
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.context("read_line failed")?;
    if n == 0 {
        return Ok(None);
    }
    let value = serde_json::from_str(line.trim_end()).context("invalid JSON frame")?;
    Ok(Some(value))
}

/// Like [`read_json_opt`] but EOF is an error.
pub async fn read_json<T, R>(reader: &mut R) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    R: AsyncBufRead + Unpin,
{
    match read_json_opt(reader).await? {
        Some(v) => Ok(v),
        None => bail!("peer closed stream (eof)"),
    }
}

pub async fn write_json<T, W>(writer: &mut W, value: &T) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut s = serde_json::to_string(value).context("serialize JSON failed")?;
    s.push('\n');
    writer.write_all(s.as_bytes()).await.context("write failed")?;
    writer.flush().await.context("flush failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn wire_shape() {
        let req: Request =
            serde_json::from_str(r#"{"cmd":"set_axis","id":3,"index":4,"value":-5}"#).unwrap();
        assert_eq!(req, Request::SetAxis { id: DeviceId(3), index: 4, value: -5 });

        let resp = serde_json::to_string(&Response::Created { id: DeviceId(1) }).unwrap();
        assert_eq!(resp, r#"{"status":"created","id":1}"#);
    }

    #[test]
    fn out_of_range_axis_value_is_rejected() {
        let res = serde_json::from_str::<Request>(r#"{"cmd":"set_axis","id":1,"index":0,"value":40000}"#);
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn frames_over_a_pipe() {
        let (mut client, server) = tokio::io::duplex(256);
        write_json(&mut client, &Request::Ping).await.unwrap();
        write_json(&mut client, &Request::Destroy { id: DeviceId(7) }).await.unwrap();
        drop(client);

        let mut rd = BufReader::new(server);
        assert_eq!(read_json::<Request, _>(&mut rd).await.unwrap(), Request::Ping);
        assert_eq!(
            read_json_opt::<Request, _>(&mut rd).await.unwrap(),
            Some(Request::Destroy { id: DeviceId(7) })
        );
        assert_eq!(read_json_opt::<Request, _>(&mut rd).await.unwrap(), None);
    }
}
