use anyhow::Result;
use easypad_core::Gamepads;
use easypad_ipc::{read_json_opt, write_json, Request, Response};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{debug, error, info, instrument};

/// Answer requests until the peer closes its side. Devices still alive at
/// EOF are released.
#[instrument(skip_all)]
pub async fn serve<R, W>(pads: &Gamepads, mut rd: R, mut wr: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        match read_json_opt::<Request, _>(&mut rd).await {
            Ok(None) => {
                info!("peer closed session");
                break;
            }
            Ok(Some(req)) => {
                debug!(?req, "request");
                let resp = handle(pads, req).await;
                write_json(&mut wr, &resp).await?;
            }
            Err(e) => {
                // malformed frame: report and keep the session open
                error!(error = %format!("{e:#}"), "bad request");
                write_json(&mut wr, &Response::err(format!("{e:#}"))).await?;
            }
        }
    }

    let released = pads.registry().destroy_all();
    if released > 0 {
        info!(released, "released devices left open by peer");
    }
    Ok(())
}

async fn handle(pads: &Gamepads, req: Request) -> Response {
    let flag = |value| Response::Bool { value };
    match req {
        Request::Ping => Response::Pong,
        Request::IsSupported => flag(pads.is_supported()),
        Request::Install => flag(pads.install().await),
        Request::Create => match pads.create() {
            Some(id) => Response::Created { id },
            None => Response::err("could not create virtual gamepad"),
        },
        Request::List => Response::Ids { ids: pads.list() },
        Request::ButtonDown { id, index } => flag(pads.button_down(id, index)),
        Request::ButtonUp { id, index } => flag(pads.button_up(id, index)),
        Request::SetAxis { id, index, value } => flag(pads.set_axis(id, index, value)),
        Request::Destroy { id } => flag(pads.destroy(id)),
        Request::IsActive { id } => flag(pads.is_active(id)),
        Request::State { id } => match pads.state(id) {
            Some(state) => Response::State { id, state },
            None => Response::err(format!("no device with handle {id}")),
        },
    }
}
