mod queue;
mod status;

pub use queue::draw_queue;
pub use status::draw_status;
