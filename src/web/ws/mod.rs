pub mod handler;

pub use handler::handle_stream_socket;
