use super::error::*;
use super::handler;
use crate::server::*;
use std::convert::Infallible;
use std::sync::Arc;
use warp::Filter;

pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let create_session = warp::path("session")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with(server.session_service.clone()))
        .and_then(handler::create_session);

    let revoke_session = warp::path("session")
        .and(warp::path::end())
        .and(warp::delete())
        .and(warp::body::json())
        .and(with(server.session_service.clone()))
        .and_then(handler::revoke_session);

    let verify_session = warp::path!("session" / "verify")
        .and(warp::post())
        .and(warp::body::json())
        .and(with(server.session_service.clone()))
        .and_then(handler::verify_session);

    let refresh_session = warp::path!("session" / "refresh")
        .and(warp::post())
        .and(warp::body::json())
        .and(with(server.session_service.clone()))
        .and_then(handler::refresh_session);

    let session_handles = warp::path!("session" / "user")
        .and(warp::get())
        .and(warp::query::<handler::SessionHandlesQuery>())
        .and(with(server.session_service.clone()))
        .and_then(handler::list_session_handles);

    let get_session_data = warp::path!("session" / "data")
        .and(warp::get())
        .and(warp::query::<handler::SessionHandleQuery>())
        .and(with(server.session_service.clone()))
        .and_then(handler::get_session_data);

    let update_session_data = warp::path!("session" / "data")
        .and(warp::put())
        .and(warp::body::json())
        .and(with(server.session_service.clone()))
        .and_then(handler::update_session_data);

    let get_jwt_payload = warp::path!("session" / "jwt" / "data")
        .and(warp::get())
        .and(warp::query::<handler::SessionHandleQuery>())
        .and(with(server.session_service.clone()))
        .and_then(handler::get_jwt_payload);

    let update_jwt_payload = warp::path!("session" / "jwt" / "data")
        .and(warp::put())
        .and(warp::body::json())
        .and(with(server.session_service.clone()))
        .and_then(handler::update_jwt_payload);

    let handshake = warp::path("handshake")
        .and(warp::path::end())
        .and(warp::post())
        .and(with(server.handshake_service.clone()))
        .and_then(handler::handshake);

    create_session
        .or(revoke_session)
        .or(verify_session)
        .or(refresh_session)
        .or(session_handles)
        .or(get_session_data)
        .or(update_session_data)
        .or(get_jwt_payload)
        .or(update_jwt_payload)
        .or(handshake)
}

/// Mounts [`routes`] under `/api/v1` with JSON error recovery.
pub fn app(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    warp::path("api")
        .and(warp::path("v1"))
        .and(routes(server))
        .recover(recover_error)
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}
