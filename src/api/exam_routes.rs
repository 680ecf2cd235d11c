use std::sync::Arc;

use warp::Filter;

use super::exam_websocket;
use crate::archive::JsonSubmissionStore;
use crate::config::Config;
use crate::exam::ExamServer;
use crate::media::WebRtcMediaEngine;

/// All HTTP and WebSocket routes, sharing one coordination server.
pub fn exam_routes(
    config: &Config,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let engine = Arc::new(WebRtcMediaEngine::new(config.media.stun_server.clone()));
    let sink = Arc::new(JsonSubmissionStore::new(&config.archive.output_dir));
    let server = Arc::new(ExamServer::new(engine, sink, config.room.max_participants));

    exam_websocket_route(server.clone())
        .or(exam_health_check(server))
        .or(exam_config_endpoint())
}

fn exam_websocket_route(
    server: Arc<ExamServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("exam")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_exam_server(server))
        .map(|ws: warp::ws::Ws, server: Arc<ExamServer>| {
            ws.on_upgrade(move |websocket| {
                exam_websocket::handle_exam_websocket(websocket, server)
            })
        })
}

fn exam_health_check(
    server: Arc<ExamServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("exam")
        .and(warp::path("health"))
        .and(warp::get())
        .and(with_exam_server(server))
        .and_then(|server: Arc<ExamServer>| async move {
            Ok::<_, warp::Rejection>(warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Exam Coordination Server",
                "version": "1.0.0",
                "activeRooms": server.room_count().await
            })))
        })
}

fn exam_config_endpoint(
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("exam")
        .and(warp::path("config"))
        .and(warp::get())
        .map(|| {
            use std::env;

            let config = serde_json::json!({
                "EXAM_WEBSOCKET_URL": env::var("EXAM_WEBSOCKET_URL").ok(),
                "STUN_SERVER_URL": env::var("STUN_SERVER_URL").ok(),
                "TEACHER_UI_URL": env::var("TEACHER_UI_URL").ok(),
                "STUDENT_UI_URL": env::var("STUDENT_UI_URL").ok()
            });

            warp::reply::json(&config)
        })
}

fn with_exam_server(
    server: Arc<ExamServer>,
) -> impl Filter<Extract = (Arc<ExamServer>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || server.clone())
}
