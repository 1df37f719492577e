pub mod component;
pub mod layout;

pub use component::{ComponentSpec, GROUP_BINDING, SIMPLE_BINDING};
pub use layout::{LayoutSet, PageSpec};
