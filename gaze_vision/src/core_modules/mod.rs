// The building blocks of the gaze engine, roughly in pipeline order. Each module
// is usable on its own; `crate::pipeline` wires them into a session.

pub mod frame;
pub mod blob;
pub mod blob_locator;
pub mod triangulation;
pub mod calibration;
pub mod gaze_mapper;
pub mod smoother;
pub mod blink;
pub mod trail;
