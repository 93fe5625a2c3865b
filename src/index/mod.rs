pub mod block;
pub mod inverted;
pub mod terms;
pub mod numeric;
pub mod tag;
pub mod geo;
pub mod geoshape;
