pub mod handlers;
pub mod mjpeg;
pub mod routes;
