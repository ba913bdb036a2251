//! Reference-image resolution for shot image generation.

/// A character with a reference image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterRef {
    pub name: String,
    pub image: String,
}

/// A scene with a reference image, addressable by name or location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneRef {
    pub name: Option<String>,
    pub location: Option<String>,
    pub image: String,
}

/// The text fields of a shot that references are matched against.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShotText<'a> {
    pub character: Option<&'a str>,
    pub scene: Option<&'a str>,
    pub prompt: &'a str,
    pub description: &'a str,
    pub dialogue: &'a str,
}

impl ShotText<'_> {
    fn mentions(&self, needle: &str) -> bool {
        !needle.is_empty()
            && (self.prompt.contains(needle)
                || self.description.contains(needle)
                || self.dialogue.contains(needle))
    }
}

/// Collects reference images for a shot: characters first, in list order,
/// then at most one scene. Duplicates are dropped.
///
/// A character matches on its exact `character` field or when its name
/// appears in the prompt, description or dialogue. The scene is the one
/// named by the `scene` field or, failing that, the first scene whose
/// name or location is mentioned.
pub fn resolve_references(
    shot: &ShotText<'_>,
    characters: &[CharacterRef],
    scenes: &[SceneRef],
) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    let mut push = |image: &str| {
        if !refs.iter().any(|r| r == image) {
            refs.push(image.to_string());
        }
    };

    for character in characters {
        if character.name.is_empty() || character.image.is_empty() {
            continue;
        }
        if shot.character == Some(character.name.as_str()) || shot.mentions(&character.name) {
            push(&character.image);
        }
    }

    // Name and location both key into the same map; later scenes win on
    // a shared key but keep its first position.
    let mut scene_keys: Vec<(&str, &str)> = Vec::new();
    for scene in scenes.iter().filter(|s| !s.image.is_empty()) {
        for key in [scene.name.as_deref(), scene.location.as_deref()]
            .into_iter()
            .flatten()
            .filter(|k| !k.is_empty())
        {
            match scene_keys.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = scene.image.as_str(),
                None => scene_keys.push((key, scene.image.as_str())),
            }
        }
    }

    let scene_key = shot
        .scene
        .filter(|s| !s.is_empty())
        .or_else(|| scene_keys.iter().map(|(k, _)| *k).find(|k| shot.mentions(k)));
    if let Some(key) = scene_key {
        if let Some((_, image)) = scene_keys.iter().find(|(k, _)| *k == key) {
            push(*image);
        }
    }

    refs
}
