mod atrous_filter;
mod taa_resolver;
mod temporal_accumulator;
mod upsampler;

pub use self::atrous_filter::*;
pub use self::taa_resolver::*;
pub use self::temporal_accumulator::*;
pub use self::upsampler::*;
