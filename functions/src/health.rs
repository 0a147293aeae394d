// functions/src/health.rs

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use warp::{http::StatusCode, Filter, Rejection, Reply};

pub const RUNNING: &str = "Service is running!";

/// `GET /` liveness route. Everything else is rejected.
pub fn routes() -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let liveness = warp::path::end().and(warp::get()).map(|| RUNNING);

    liveness.recover(handle_rejection)
}

/// Bind the health server. Binding happens here so a taken port is reported
/// before the returned future is spawned.
pub fn bind(addr: SocketAddr) -> Result<(SocketAddr, impl Future<Output = ()>), warp::Error> {
    warp::serve(routes()).try_bind_ephemeral(addr)
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
    } else {
        tracing::error!("unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    };

    Ok(warp::reply::with_status(message, code))
}
