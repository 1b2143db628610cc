//! riptide demo server.
//!
//! Serves a handful of HTTP routes and two WebSocket endpoints (a raw
//! echo at `/` and a managed callback handler at `/managed`) on every
//! shard.

use clap::Parser;
use riptide_core::{
    ConnectedWebsocket, FunctionHandler, Method, Opcode, Reply, Request, RouteError, RouteTable,
    WsCallbackHandler, WsFunctionHandler, WsMessage,
};
use riptide_http::ServerControl;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "riptide-httpd", about = "Shard-parallel HTTP/WebSocket server")]
struct Args {
    /// HTTP server port.
    #[arg(long, default_value_t = 10000)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    addr: IpAddr,

    /// Number of shards; defaults to the available parallelism.
    #[arg(long)]
    shards: Option<usize>,
}

fn set_routes(r: &mut RouteTable) -> Result<(), RouteError> {
    r.add(
        Method::Get,
        "/",
        FunctionHandler::new(|_req: Request, mut rep: Reply| async move {
            rep.set_body("hello");
            rep.set_content_type("text/html");
            Ok(rep)
        }),
    )?;

    r.add(
        Method::Get,
        "/jf",
        FunctionHandler::new(|_req: Request, mut rep: Reply| async move {
            // A handler that yields before resolving.
            tokio::task::yield_now().await;
            rep.set_body("\"json-future\"");
            rep.set_content_type("application/json");
            Ok(rep)
        }),
    )?;

    r.add(
        Method::Get,
        "/file/*path",
        FunctionHandler::new(|req: Request, mut rep: Reply| async move {
            let path = req.param("path").unwrap_or_default().to_string();
            rep.set_body(path);
            rep.set_content_type("text/plain");
            Ok(rep)
        }),
    )?;

    // Raw echo: full control of the upgraded stream.
    r.put(
        "/",
        WsFunctionHandler::new(|_req: Request, mut ws: ConnectedWebsocket| async move {
            loop {
                let msg = ws.read_message().await?;
                if msg.is_close() {
                    break;
                }
                match msg.opcode {
                    Opcode::Ping => {
                        ws.write_message(&WsMessage::new(Opcode::Pong, msg.payload))
                            .await?;
                    }
                    Opcode::Pong => {}
                    _ => ws.write_message(&msg).await?,
                }
            }
            Ok(())
        }),
    );

    // Managed session: callbacks over an outbound sink.
    r.put(
        "/managed",
        WsCallbackHandler::new()
            .on_connection(|_req, out| {
                out.send_text("Hello from riptide!");
            })
            .on_message(|_req, out, msg| {
                out.send(msg);
            })
            .on_disconnection(|req, _out| {
                tracing::debug!(path = %req.path, "websocket session ended");
            }),
    );

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let shards = args.shards.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
    });

    let control = ServerControl::start("riptide", shards)?;
    control.set_routes(set_routes).await?;
    let addr = control
        .listen(SocketAddr::new(args.addr, args.port))
        .await?;
    tracing::info!(%addr, shards, "riptide HTTP server listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    control.stop().await?;
    control.shutdown();
    Ok(())
}
