mod compiler;
mod database;
mod discovery;

pub use compiler::{
    compile_layout_database, parse_layout_document, ContentCompileError, ContentErrorCode,
    SourceLocation,
};
pub use database::{
    ActorDef, InteractionDef, LayoutDatabase, RoomBounds, RoomCategoryDef, RoomDef,
    AGENT_ACTOR_DEF, PLAYER_ACTOR_DEF,
};
pub use discovery::{LayoutRequest, BASE_LAYER_ID};
