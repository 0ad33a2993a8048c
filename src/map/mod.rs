pub mod containment;
pub mod feature;
pub mod geo_bounds;
pub mod layers;
pub mod region;
