use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};

use crate::app::Vec2;
use crate::AppPaths;

use super::database::{
    ActorDef, InteractionDef, LayoutDatabase, RoomBounds, RoomCategoryDef, RoomDef,
    AGENT_ACTOR_DEF, PLAYER_ACTOR_DEF,
};
use super::discovery::{discover_layer_sources, LayerDiscoveryError, LayoutRequest};

const DEFAULT_TRIGGER_RADIUS: f32 = 0.5;
const DEFAULT_COLLIDER_RADIUS: f32 = 0.3;
const MERGED_LAYER_ID: &str = "<merged>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentErrorCode {
    Discovery,
    ReadFile,
    XmlMalformed,
    InvalidRoot,
    UnknownDefType,
    UnknownField,
    DuplicateField,
    MissingField,
    InvalidValue,
    DuplicateDefInLayer,
    DuplicateInteraction,
    InteractionOutsideRoom,
    MissingActor,
}

#[derive(Debug, Clone)]
pub struct ContentCompileError {
    pub code: ContentErrorCode,
    pub message: String,
    pub layer_id: String,
    pub file_path: PathBuf,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for ContentCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{:?}: {} (layer={}, file={}, line={}, column={})",
                self.code,
                self.message,
                self.layer_id,
                self.file_path.display(),
                loc.line,
                loc.column
            ),
            None => write!(
                f,
                "{:?}: {} (layer={}, file={})",
                self.code,
                self.message,
                self.layer_id,
                self.file_path.display()
            ),
        }
    }
}

impl std::error::Error for ContentCompileError {}

#[derive(Debug, Clone)]
struct DefOrigin {
    layer_id: String,
    file_path: PathBuf,
    location: SourceLocation,
}

#[derive(Debug, Clone)]
enum ParsedDef {
    Room(RoomDef),
    Actor(ActorDef),
}

impl ParsedDef {
    fn kind(&self) -> &'static str {
        match self {
            Self::Room(_) => "RoomDef",
            Self::Actor(_) => "ActorDef",
        }
    }

    fn def_name(&self) -> &str {
        match self {
            Self::Room(room) => &room.def_name,
            Self::Actor(actor) => &actor.def_name,
        }
    }
}

#[derive(Debug, Default)]
struct MergedLayout {
    rooms: BTreeMap<String, (RoomDef, DefOrigin)>,
    actors: BTreeMap<String, ActorDef>,
}

impl MergedLayout {
    /// Within one layer every `(kind, defName)` pair may appear once; across layers later wins.
    fn merge_layer(
        &mut self,
        layer_id: &str,
        file_path: &Path,
        defs: Vec<(ParsedDef, SourceLocation)>,
        seen_in_layer: &mut HashSet<(&'static str, String)>,
    ) -> Result<(), ContentCompileError> {
        for (def, location) in defs {
            if !seen_in_layer.insert((def.kind(), def.def_name().to_string())) {
                return Err(ContentCompileError {
                    code: ContentErrorCode::DuplicateDefInLayer,
                    message: format!(
                        "duplicate {} '{}' in layer '{}'; each layer may define a defName only once",
                        def.kind(),
                        def.def_name(),
                        layer_id
                    ),
                    layer_id: layer_id.to_string(),
                    file_path: file_path.to_path_buf(),
                    location: Some(location),
                });
            }
            match def {
                ParsedDef::Room(room) => {
                    let origin = DefOrigin {
                        layer_id: layer_id.to_string(),
                        file_path: file_path.to_path_buf(),
                        location,
                    };
                    self.rooms.insert(room.def_name.clone(), (room, origin));
                }
                ParsedDef::Actor(actor) => {
                    self.actors.insert(actor.def_name.clone(), actor);
                }
            }
        }
        Ok(())
    }

    fn into_database(self) -> Result<LayoutDatabase, ContentCompileError> {
        let mut owners = HashMap::<String, String>::new();
        for (room, origin) in self.rooms.values() {
            for interaction in &room.interactions {
                if let Some(owner) =
                    owners.insert(interaction.def_name.clone(), room.def_name.clone())
                {
                    return Err(ContentCompileError {
                        code: ContentErrorCode::DuplicateInteraction,
                        message: format!(
                            "interaction '{}' is declared by both room '{}' and room '{}'",
                            interaction.def_name, owner, room.def_name
                        ),
                        layer_id: origin.layer_id.clone(),
                        file_path: origin.file_path.clone(),
                        location: Some(origin.location),
                    });
                }
            }
        }

        let rooms = self.rooms.into_values().map(|(room, _)| room).collect();
        let actors = self.actors.into_values().collect();
        Ok(LayoutDatabase::from_defs(rooms, actors))
    }
}

/// Compiles the base layer plus enabled overlays into a single layout.
pub fn compile_layout_database(
    app_paths: &AppPaths,
    request: &LayoutRequest,
) -> Result<LayoutDatabase, ContentCompileError> {
    let sources = discover_layer_sources(app_paths, request)
        .map_err(|error| map_discovery_error(error, &app_paths.root))?;

    let mut merged = MergedLayout::default();
    for source in sources {
        let xml_files = collect_xml_files_sorted(&source.source_dir)
            .map_err(|error| read_error(&source.layer_id, error.path, error.source))?;
        let mut seen_in_layer = HashSet::new();

        for xml_file in xml_files {
            let raw = fs::read_to_string(&xml_file)
                .map_err(|source_err| read_error(&source.layer_id, xml_file.clone(), source_err))?;
            let defs = parse_defs_document(&source.layer_id, &xml_file, &raw)?;
            merged.merge_layer(&source.layer_id, &xml_file, defs, &mut seen_in_layer)?;
        }
    }

    for required in [AGENT_ACTOR_DEF, PLAYER_ACTOR_DEF] {
        if !merged.actors.contains_key(required) {
            return Err(ContentCompileError {
                code: ContentErrorCode::MissingActor,
                message: format!("no layer defines the required <ActorDef> '{required}'"),
                layer_id: MERGED_LAYER_ID.to_string(),
                file_path: app_paths.base_layout_dir.clone(),
                location: None,
            });
        }
    }

    merged.into_database()
}

/// Parses a single layout document on its own, without layering or required actors.
pub fn parse_layout_document(
    layer_id: &str,
    file_path: &Path,
    raw: &str,
) -> Result<LayoutDatabase, ContentCompileError> {
    let defs = parse_defs_document(layer_id, file_path, raw)?;
    let mut merged = MergedLayout::default();
    merged.merge_layer(layer_id, file_path, defs, &mut HashSet::new())?;
    merged.into_database()
}

struct ParseContext<'a, 'input> {
    layer_id: &'a str,
    file_path: &'a Path,
    doc: &'a Document<'input>,
}

impl ParseContext<'_, '_> {
    fn location_of(&self, node: Node<'_, '_>) -> SourceLocation {
        let pos = self.doc.text_pos_at(node.range().start);
        SourceLocation {
            line: pos.row as usize,
            column: pos.col as usize,
        }
    }

    fn error_at(
        &self,
        code: ContentErrorCode,
        message: String,
        node: Node<'_, '_>,
    ) -> ContentCompileError {
        self.error_at_location(code, message, self.location_of(node))
    }

    fn error_at_location(
        &self,
        code: ContentErrorCode,
        message: String,
        location: SourceLocation,
    ) -> ContentCompileError {
        ContentCompileError {
            code,
            message,
            layer_id: self.layer_id.to_string(),
            file_path: self.file_path.to_path_buf(),
            location: Some(location),
        }
    }

    fn required_text(
        &self,
        node: Node<'_, '_>,
        field_name: &str,
    ) -> Result<String, ContentCompileError> {
        let value = node.text().map(str::trim).unwrap_or_default().to_string();
        if value.is_empty() {
            return Err(self.error_at(
                ContentErrorCode::MissingField,
                format!("field <{}> must not be empty", field_name),
                node,
            ));
        }
        Ok(value)
    }

    fn bool_field(&self, node: Node<'_, '_>, field_name: &str) -> Result<bool, ContentCompileError> {
        let value = self.required_text(node, field_name)?;
        match value.to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(self.error_at(
                ContentErrorCode::InvalidValue,
                format!("{} '{}' must be true or false", field_name, value),
                node,
            )),
        }
    }

    fn numbers_field(
        &self,
        node: Node<'_, '_>,
        field_name: &str,
        expected: usize,
        shape: &str,
    ) -> Result<Vec<f32>, ContentCompileError> {
        let value = self.required_text(node, field_name)?;
        let invalid = || {
            self.error_at(
                ContentErrorCode::InvalidValue,
                format!(
                    "{} '{}' must be {} finite numbers formatted as '{}'",
                    field_name, value, expected, shape
                ),
                node,
            )
        };
        let parsed = value
            .split(',')
            .map(|part| part.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;
        if parsed.len() != expected || parsed.iter().any(|number| !number.is_finite()) {
            return Err(invalid());
        }
        Ok(parsed)
    }

    fn vec2_field(&self, node: Node<'_, '_>, field_name: &str) -> Result<Vec2, ContentCompileError> {
        let numbers = self.numbers_field(node, field_name, 2, "x,y")?;
        Ok(Vec2::new(numbers[0], numbers[1]))
    }

    fn positive_field(
        &self,
        node: Node<'_, '_>,
        field_name: &str,
    ) -> Result<f32, ContentCompileError> {
        let value = self.required_text(node, field_name)?;
        match value.parse::<f32>() {
            Ok(parsed) if parsed.is_finite() && parsed > 0.0 => Ok(parsed),
            _ => Err(self.error_at(
                ContentErrorCode::InvalidValue,
                format!("{} '{}' must be a finite number > 0", field_name, value),
                node,
            )),
        }
    }

    fn check_unique_field(
        &self,
        seen_fields: &mut HashSet<String>,
        field: Node<'_, '_>,
        owner: &str,
    ) -> Result<String, ContentCompileError> {
        let field_name = field.tag_name().name().to_string();
        if !seen_fields.insert(field_name.clone()) {
            return Err(self.error_at(
                ContentErrorCode::DuplicateField,
                format!("duplicate field <{}> in <{}>", field_name, owner),
                field,
            ));
        }
        Ok(field_name)
    }

    fn unknown_field(&self, field_name: &str, owner: &str, field: Node<'_, '_>) -> ContentCompileError {
        self.error_at(
            ContentErrorCode::UnknownField,
            format!("unknown field <{}> in <{}>", field_name, owner),
            field,
        )
    }

    fn missing_field(&self, field_name: &str, owner: &str, node: Node<'_, '_>) -> ContentCompileError {
        self.error_at(
            ContentErrorCode::MissingField,
            format!("missing required field <{}> in <{}>", field_name, owner),
            node,
        )
    }
}

fn parse_defs_document(
    layer_id: &str,
    file_path: &Path,
    raw: &str,
) -> Result<Vec<(ParsedDef, SourceLocation)>, ContentCompileError> {
    let doc = Document::parse(raw).map_err(|error| ContentCompileError {
        code: ContentErrorCode::XmlMalformed,
        message: format!("malformed XML: {error}"),
        layer_id: layer_id.to_string(),
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: error.pos().row as usize,
            column: error.pos().col as usize,
        }),
    })?;
    let ctx = ParseContext {
        layer_id,
        file_path,
        doc: &doc,
    };

    let root = doc.root_element();
    if root.tag_name().name() != "Defs" {
        return Err(ctx.error_at(
            ContentErrorCode::InvalidRoot,
            "root element must be <Defs>".to_string(),
            root,
        ));
    }

    let mut defs = Vec::new();
    for child in root.children().filter(|node| node.is_element()) {
        let location = ctx.location_of(child);
        let def = match child.tag_name().name() {
            "RoomDef" => ParsedDef::Room(parse_room_def(&ctx, child)?),
            "ActorDef" => ParsedDef::Actor(parse_actor_def(&ctx, child)?),
            other => {
                return Err(ctx.error_at(
                    ContentErrorCode::UnknownDefType,
                    format!(
                        "unsupported def type <{}>; expected <RoomDef> or <ActorDef>",
                        other
                    ),
                    child,
                ))
            }
        };
        defs.push((def, location));
    }

    Ok(defs)
}

fn parse_room_def(
    ctx: &ParseContext<'_, '_>,
    node: Node<'_, '_>,
) -> Result<RoomDef, ContentCompileError> {
    let mut seen_fields = HashSet::<String>::new();
    let mut def_name: Option<String> = None;
    let mut label: Option<String> = None;
    let mut category: Option<RoomCategoryDef> = None;
    let mut active = true;
    let mut bounds: Option<RoomBounds> = None;
    let mut wrong_destination: Option<(Vec2, SourceLocation)> = None;
    let mut interactions = Vec::<(InteractionDef, SourceLocation)>::new();

    for field in node.children().filter(|child| child.is_element()) {
        let field_name = ctx.check_unique_field(&mut seen_fields, field, "RoomDef")?;
        match field_name.as_str() {
            "defName" => def_name = Some(ctx.required_text(field, "defName")?),
            "label" => label = Some(ctx.required_text(field, "label")?),
            "category" => category = Some(parse_category(ctx, field)?),
            "active" => active = ctx.bool_field(field, "active")?,
            "bounds" => {
                let numbers = ctx.numbers_field(field, "bounds", 4, "minX,minY,maxX,maxY")?;
                let min = Vec2::new(numbers[0], numbers[1]);
                let max = Vec2::new(numbers[2], numbers[3]);
                if min.x >= max.x || min.y >= max.y {
                    return Err(ctx.error_at(
                        ContentErrorCode::InvalidValue,
                        "bounds must satisfy minX < maxX and minY < maxY".to_string(),
                        field,
                    ));
                }
                bounds = Some(RoomBounds::new(min, max));
            }
            "wrongDestination" => {
                wrong_destination = Some((
                    ctx.vec2_field(field, "wrongDestination")?,
                    ctx.location_of(field),
                ));
            }
            "interactions" => {
                for entry in field.children().filter(|child| child.is_element()) {
                    if entry.tag_name().name() != "InteractionDef" {
                        return Err(ctx.error_at(
                            ContentErrorCode::UnknownDefType,
                            format!(
                                "unsupported entry <{}> in <interactions>; expected <InteractionDef>",
                                entry.tag_name().name()
                            ),
                            entry,
                        ));
                    }
                    interactions.push((parse_interaction_def(ctx, entry)?, ctx.location_of(entry)));
                }
            }
            _ => return Err(ctx.unknown_field(&field_name, "RoomDef", field)),
        }
    }

    let Some(def_name) = def_name else {
        return Err(ctx.missing_field("defName", "RoomDef", node));
    };
    let Some(category) = category else {
        return Err(ctx.missing_field("category", "RoomDef", node));
    };
    let Some(bounds) = bounds else {
        return Err(ctx.missing_field("bounds", "RoomDef", node));
    };

    if let (RoomCategoryDef::Fixed, Some((_, location))) = (&category, &wrong_destination) {
        return Err(ctx.error_at_location(
            ContentErrorCode::InvalidValue,
            format!(
                "room '{}' is Fixed and cannot declare a <wrongDestination>",
                def_name
            ),
            *location,
        ));
    }

    let mut seen_interactions = HashSet::<String>::new();
    for (interaction, location) in &interactions {
        if !bounds.contains(interaction.position) {
            return Err(ctx.error_at_location(
                ContentErrorCode::InteractionOutsideRoom,
                format!(
                    "interaction '{}' at ({}, {}) lies outside the bounds of room '{}'",
                    interaction.def_name, interaction.position.x, interaction.position.y, def_name
                ),
                *location,
            ));
        }
        if !seen_interactions.insert(interaction.def_name.clone()) {
            return Err(ctx.error_at_location(
                ContentErrorCode::DuplicateInteraction,
                format!(
                    "interaction '{}' is declared twice in room '{}'",
                    interaction.def_name, def_name
                ),
                *location,
            ));
        }
    }

    Ok(RoomDef {
        label: label.unwrap_or_else(|| def_name.clone()),
        def_name,
        category,
        active,
        bounds,
        wrong_destination: wrong_destination.map(|(point, _)| point),
        interactions: interactions.into_iter().map(|(def, _)| def).collect(),
    })
}

fn parse_category(
    ctx: &ParseContext<'_, '_>,
    field: Node<'_, '_>,
) -> Result<RoomCategoryDef, ContentCompileError> {
    let value = ctx.required_text(field, "category")?;
    if value == "Fixed" {
        return Ok(RoomCategoryDef::Fixed);
    }
    match value.strip_prefix("Mutant:").map(str::trim) {
        Some(variant) if !variant.is_empty() => Ok(RoomCategoryDef::Mutant(variant.to_string())),
        _ => Err(ctx.error_at(
            ContentErrorCode::InvalidValue,
            format!(
                "invalid category '{}'; allowed values: Fixed, Mutant:<variant>",
                value
            ),
            field,
        )),
    }
}

fn parse_interaction_def(
    ctx: &ParseContext<'_, '_>,
    node: Node<'_, '_>,
) -> Result<InteractionDef, ContentCompileError> {
    let mut seen_fields = HashSet::<String>::new();
    let mut def_name: Option<String> = None;
    let mut text: Option<String> = None;
    let mut position: Option<Vec2> = None;
    let mut trigger_radius = DEFAULT_TRIGGER_RADIUS;
    let mut active = true;

    for field in node.children().filter(|child| child.is_element()) {
        let field_name = ctx.check_unique_field(&mut seen_fields, field, "InteractionDef")?;
        match field_name.as_str() {
            "defName" => def_name = Some(ctx.required_text(field, "defName")?),
            "text" => text = Some(ctx.required_text(field, "text")?),
            "position" => position = Some(ctx.vec2_field(field, "position")?),
            "triggerRadius" => trigger_radius = ctx.positive_field(field, "triggerRadius")?,
            "active" => active = ctx.bool_field(field, "active")?,
            _ => return Err(ctx.unknown_field(&field_name, "InteractionDef", field)),
        }
    }

    let Some(def_name) = def_name else {
        return Err(ctx.missing_field("defName", "InteractionDef", node));
    };
    let Some(text) = text else {
        return Err(ctx.missing_field("text", "InteractionDef", node));
    };
    let Some(position) = position else {
        return Err(ctx.missing_field("position", "InteractionDef", node));
    };

    Ok(InteractionDef {
        def_name,
        text,
        position,
        trigger_radius,
        active,
    })
}

fn parse_actor_def(
    ctx: &ParseContext<'_, '_>,
    node: Node<'_, '_>,
) -> Result<ActorDef, ContentCompileError> {
    let mut seen_fields = HashSet::<String>::new();
    let mut def_name: Option<(String, Node<'_, '_>)> = None;
    let mut spawn: Option<Vec2> = None;
    let mut collider_radius = DEFAULT_COLLIDER_RADIUS;

    for field in node.children().filter(|child| child.is_element()) {
        let field_name = ctx.check_unique_field(&mut seen_fields, field, "ActorDef")?;
        match field_name.as_str() {
            "defName" => def_name = Some((ctx.required_text(field, "defName")?, field)),
            "spawn" => spawn = Some(ctx.vec2_field(field, "spawn")?),
            "colliderRadius" => collider_radius = ctx.positive_field(field, "colliderRadius")?,
            _ => return Err(ctx.unknown_field(&field_name, "ActorDef", field)),
        }
    }

    let Some((def_name, def_name_node)) = def_name else {
        return Err(ctx.missing_field("defName", "ActorDef", node));
    };
    if def_name != AGENT_ACTOR_DEF && def_name != PLAYER_ACTOR_DEF {
        return Err(ctx.error_at(
            ContentErrorCode::InvalidValue,
            format!(
                "invalid ActorDef '{}'; allowed values: {}, {}",
                def_name, AGENT_ACTOR_DEF, PLAYER_ACTOR_DEF
            ),
            def_name_node,
        ));
    }
    let Some(spawn) = spawn else {
        return Err(ctx.missing_field("spawn", "ActorDef", node));
    };

    Ok(ActorDef {
        def_name,
        spawn,
        collider_radius,
    })
}

struct ReadError {
    path: PathBuf,
    source: std::io::Error,
}

fn collect_xml_files_sorted(root: &Path) -> Result<Vec<PathBuf>, ReadError> {
    let mut files = Vec::<PathBuf>::new();
    collect_recursive(root, &mut files)?;
    files.sort_by_key(|path| normalize_rel_path(path.strip_prefix(root).unwrap_or(path.as_path())));
    Ok(files)
}

fn collect_recursive(current: &Path, files: &mut Vec<PathBuf>) -> Result<(), ReadError> {
    let entries = fs::read_dir(current).map_err(|source| ReadError {
        path: current.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ReadError {
            path: current.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, files)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn normalize_rel_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_error(layer_id: &str, path: PathBuf, source: std::io::Error) -> ContentCompileError {
    ContentCompileError {
        code: ContentErrorCode::ReadFile,
        message: format!("failed to read XML file: {source}"),
        layer_id: layer_id.to_string(),
        file_path: path,
        location: None,
    }
}

fn map_discovery_error(error: LayerDiscoveryError, root: &Path) -> ContentCompileError {
    match error {
        LayerDiscoveryError::OverlayMissing {
            layer_id,
            expected_dir,
        } => ContentCompileError {
            code: ContentErrorCode::Discovery,
            message: format!(
                "enabled overlay '{}' not found at {}; check ERRAND_OVERLAYS",
                layer_id,
                expected_dir.display()
            ),
            layer_id,
            file_path: expected_dir,
            location: None,
        },
        other => ContentCompileError {
            code: ContentErrorCode::Discovery,
            message: other.to_string(),
            layer_id: "<discovery>".to_string(),
            file_path: root.to_path_buf(),
            location: None,
        },
    }
}
