// Domain layer: records exchanged with PostEx and the ports the core talks through.

pub mod model;
pub mod ports;
