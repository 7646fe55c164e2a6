mod behavior;
mod controller;
mod difficulty;
mod events;
mod nav;
mod picker;
mod scene;
mod triggers;
mod tuning;
mod world;

pub(crate) use scene::ErrandScene;
pub(crate) use tuning::{load_tuning_file, GameplayTuning, TuningError};
