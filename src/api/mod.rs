pub mod exam_routes;
mod exam_websocket;
