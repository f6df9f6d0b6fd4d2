//! Input checks that run before anything reaches the store
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    Avatar, BoardError, CreatePersonInput, CreateProjectInput, EntityId, Result,
    UpdatePersonInput, UpdateProjectInput,
};

static HEX_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^#([0-9A-F]{3}){1,2}$").expect("hex color pattern"));

static USERNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_]{1,16}$").expect("username pattern"));

/// `#RGB` or `#RRGGBB`, case-insensitive
pub fn is_valid_hex_color(color: &str) -> bool {
    HEX_COLOR.is_match(color)
}

pub fn is_valid_username(name: &str) -> bool {
    USERNAME.is_match(name)
}

/// Normalizes an input and rejects it if it cannot be written
pub trait Validate: Sized {
    fn validated(self) -> Result<Self>;
}

impl Validate for CreateProjectInput {
    fn validated(mut self) -> Result<Self> {
        self.title = required_text(&self.title, "project title")?;
        self.description = self.description.trim().to_string();
        self.assigned_people = dedupe_ids(self.assigned_people);
        Ok(self)
    }
}

impl Validate for UpdateProjectInput {
    fn validated(mut self) -> Result<Self> {
        if let Some(title) = &self.title {
            self.title = Some(required_text(title, "project title")?);
        }
        if let Some(description) = &self.description {
            self.description = Some(description.trim().to_string());
        }
        self.assigned_people = self.assigned_people.map(dedupe_ids);
        Ok(self)
    }
}

impl Validate for CreatePersonInput {
    fn validated(mut self) -> Result<Self> {
        self.name = required_text(&self.name, "person name")?;
        self.color = checked_color(&self.color)?;
        self.avatar = self.avatar.map(checked_avatar).transpose()?;
        Ok(self)
    }
}

impl Validate for UpdatePersonInput {
    fn validated(mut self) -> Result<Self> {
        if let Some(name) = &self.name {
            self.name = Some(required_text(name, "person name")?);
        }
        if let Some(color) = &self.color {
            self.color = Some(checked_color(color)?);
        }
        if let Some(Some(avatar)) = self.avatar {
            self.avatar = Some(Some(checked_avatar(avatar)?));
        }
        Ok(self)
    }
}

fn required_text(value: &str, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BoardError::Validation(format!("{} is required", what)));
    }
    Ok(trimmed.to_string())
}

fn checked_color(color: &str) -> Result<String> {
    let color = color.trim();
    if !is_valid_hex_color(color) {
        return Err(BoardError::Validation(format!(
            "'{}' is not a hex color (#RGB or #RRGGBB)",
            color
        )));
    }
    Ok(color.to_string())
}

fn checked_avatar(avatar: Avatar) -> Result<Avatar> {
    match avatar {
        Avatar::Image { url } => Ok(Avatar::Image {
            url: required_text(&url, "avatar image")?,
        }),
        Avatar::Username { name } => {
            let name = name.trim().to_string();
            if !is_valid_username(&name) {
                return Err(BoardError::Validation(format!(
                    "invalid username '{}' (a-z, 0-9 and _ only, at most 16 characters)",
                    name
                )));
            }
            Ok(Avatar::Username { name })
        }
    }
}

/// Keeps the first occurrence of each id
fn dedupe_ids(ids: Vec<EntityId>) -> Vec<EntityId> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
