use std::path::PathBuf;

use anyhow::Context;
use mediaq_core::fs_paths::AppPaths;
use mediaq_core::models::settings::AppSettings;

const SETTINGS_FILE: &str = "settings.json";

pub fn settings_path(paths: &dyn AppPaths) -> PathBuf {
    paths.data_dir().join(SETTINGS_FILE)
}

pub fn load_settings(paths: &dyn AppPaths) -> AppSettings {
    let path = settings_path(paths);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(_) => return AppSettings::default(),
    };

    match serde_json::from_str::<AppSettings>(&raw) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("ignoring malformed {}: {}", path.display(), e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(paths: &dyn AppPaths, settings: &AppSettings) -> anyhow::Result<()> {
    let path = settings_path(paths);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Deep-merges `partial` into the stored settings and saves the result.
pub fn update_settings(
    paths: &dyn AppPaths,
    partial: &serde_json::Value,
) -> anyhow::Result<AppSettings> {
    if !partial.is_object() {
        anyhow::bail!("settings patch must be a JSON object");
    }
    let current = load_settings(paths);
    let mut current_val = serde_json::to_value(&current)?;
    merge_json(&mut current_val, partial);
    let updated: AppSettings =
        serde_json::from_value(current_val).context("patched settings are invalid")?;
    save_settings(paths, &updated)?;
    Ok(updated)
}

pub fn reset_settings(paths: &dyn AppPaths) -> anyhow::Result<AppSettings> {
    let defaults = AppSettings::default();
    save_settings(paths, &defaults)?;
    Ok(defaults)
}

fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    if let (Some(base_obj), Some(patch_obj)) = (base.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_obj {
            let nested = value.is_object() && base_obj.get(key).is_some_and(|v| v.is_object());
            if nested {
                if let Some(existing) = base_obj.get_mut(key) {
                    merge_json(existing, value);
                }
            } else {
                base_obj.insert(key.clone(), value.clone());
            }
        }
    }
}
