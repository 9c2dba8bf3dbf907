mod launch;
mod model;
mod validate;

pub use launch::{
    load_custom_config, LaunchDescription, OptionValue, RoleInstance, RoleKind, IMPLICIT_HUB_NAME,
    LAUNCHER_SECTION,
};
pub use model::*;
