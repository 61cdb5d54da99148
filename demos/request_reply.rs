//! Request/reply over the in-memory transport.
//!
//! A responder consumes `queue/math.none` and answers on the per-request reply
//! queue; a requester sends two requests through [`Correlator::request`] and a
//! third through the callback form. Every publish is logged through tracing.
//!
//! Run with: RUST_LOG=debug cargo run --example request_reply

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::panic_in_result_fn
)]

use std::sync::Arc;

use mom_messaging::{
    //
    create_memory_transport,
    AddressOptions,
    Body,
    CorrelationId,
    CorrelatorBuilder,
    Messenger,
    MessagingError,
    Result,
    TracingLogger,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[derive(Debug, Serialize, Deserialize)]
struct AddRequest {
    a: i32,
    b: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct AddResponse {
    sum: i32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_line_number(true)
        .init();

    let server_transport = create_memory_transport("math-server").await?;
    let responder = CorrelatorBuilder::new(server_transport.clone())
        .logger(Arc::new(TracingLogger))
        .build();
    let mut inbox = Messenger::new(server_transport.clone())
        .subscribe_messages(&AddressOptions::service("math"))
        .await?;

    let server = tokio::spawn(async move {
        for _ in 0..3 {
            let Some(delivery) = inbox.next().await else {
                break;
            };
            let delivery = delivery?;
            let id = delivery
                .correlation_id()
                .ok_or_else(|| MessagingError::Transport("request without correlation id".into()))?;
            let req: AddRequest = delivery.body.deserialize()?;
            let reply = Body::structured(&AddResponse { sum: req.a + req.b })?;
            responder.send_response("math", &id, Some(reply)).await?;
        }
        inbox.close().await
    });

    let client_transport = create_memory_transport("Roxy").await?;
    let requester = CorrelatorBuilder::new(client_transport.clone())
        .logger(Arc::new(TracingLogger))
        .build();

    let math = AddressOptions::service("math");
    for (a, b) in [(20, 3), (7, 35)] {
        let reply = requester
            .request(&math, Body::structured(&AddRequest { a, b })?)
            .await?;
        let resp: AddResponse = reply.deserialize()?;
        println!("{a} + {b} = {}", resp.sum);
    }

    // Callback form: subscribe first, then publish the request by hand.
    let id = CorrelationId::generate();
    let task = requester
        .receive_response("math", &id, |body| {
            let resp: AddResponse = body.deserialize().expect("bad reply");
            println!("1 + 1 = {}", resp.sum);
        })
        .await?;
    requester
        .messenger()
        .publish_request(&math, &id, Body::structured(&AddRequest { a: 1, b: 1 })?)
        .await?;
    task.await.expect("reply task panicked")?;

    server.await.expect("server task panicked")?;
    client_transport.close().await?;
    server_transport.close().await?;
    Ok(())
}
