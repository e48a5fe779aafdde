// Domain layer: records, partitions and the ports (interfaces) the extraction core talks through.

pub mod model;
pub mod ports;
