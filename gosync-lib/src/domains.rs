mod points_to;
pub use points_to::*;

mod value;
pub use value::*;

mod outcomes;
pub use outcomes::*;

#[cfg(test)]
mod points_to_tests;

#[cfg(test)]
mod value_tests;
