use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::session::DEFAULT_RENEWAL_SKEW_MS;

pub const RC_ENV_VAR: &str =
  "CORKBOARDRC";

const DEFAULTS: &[(&str, &str)] = &[
  (
    "api.base_url",
    "http://localhost:8000"
  ),
  ("api.timeout_secs", "30"),
  ("session.skew_ms", "5000"),
  ("users.page_size", "10"),
  ("workspaces.page_size", "20"),
  ("data.location", "~/.corkboard"),
  ("display.timezone", "UTC"),
  ("color", "on")
];

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading corkboardrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no corkboardrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn get_u64(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u64>> {
    self
      .map
      .get(key)
      .map(|v| {
        v.trim().parse::<u64>().with_context(
          || {
            format!(
              "config key {key} must be \
               a non-negative integer, \
               got {v:?}"
            )
          }
        )
      })
      .transpose()
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  pub fn api_base_url(&self) -> String {
    self
      .get("api.base_url")
      .unwrap_or_else(|| {
        DEFAULTS[0].1.to_string()
      })
  }

  pub fn api_timeout(
    &self
  ) -> anyhow::Result<Duration> {
    Ok(Duration::from_secs(
      self
        .get_u64("api.timeout_secs")?
        .unwrap_or(30)
        .max(1)
    ))
  }

  pub fn session_skew(
    &self
  ) -> anyhow::Result<chrono::Duration>
  {
    let ms = self
      .get_u64("session.skew_ms")?
      .map(|v| v as i64)
      .unwrap_or(DEFAULT_RENEWAL_SKEW_MS);
    Ok(chrono::Duration::milliseconds(
      ms
    ))
  }

  pub fn page_size(
    &self,
    key: &str,
    fallback: u32
  ) -> anyhow::Result<u32> {
    let size = self
      .get_u64(key)?
      .unwrap_or(u64::from(fallback));
    u32::try_from(size)
      .ok()
      .filter(|size| *size > 0)
      .ok_or_else(|| {
        anyhow!(
          "config key {key} must be \
           between 1 and {}",
          u32::MAX
        )
      })
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once(" #")
      {
        line = before.trim();
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping \
       ~/.corkboardrc"
    );
    return Ok(None);
  };
  let candidate =
    home.join(".corkboardrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".corkboard"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  #[test]
  fn rc_file_with_include_overrides_defaults()
  {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    let extra = dir.path().join("extra.rc");
    fs::write(
      &extra,
      "users.page_size = 25\n"
    )
    .expect("write include");

    let main = dir.path().join("main.rc");
    let mut file = fs::File::create(&main)
      .expect("create rc");
    writeln!(
      file,
      "# board service\n\
       api.base_url = https://board.example.com # prod\n\
       include extra.rc\n\
       session.skew_ms = 2500"
    )
    .expect("write rc");

    let mut cfg = Config::load(Some(&main))
      .expect("load");
    assert_eq!(
      cfg.api_base_url(),
      "https://board.example.com"
    );
    assert_eq!(
      cfg
        .page_size("users.page_size", 10)
        .expect("page size"),
      25
    );
    assert_eq!(
      cfg.session_skew().expect("skew"),
      chrono::Duration::milliseconds(2500)
    );
    assert_eq!(cfg.loaded_files.len(), 2);

    cfg.apply_overrides([(
      "rc.api.timeout_secs".to_string(),
      "5".to_string()
    )]);
    assert_eq!(
      cfg.api_timeout().expect("timeout"),
      Duration::from_secs(5)
    );
  }

  #[test]
  fn malformed_values_are_reported() {
    let mut cfg = Config::default();
    cfg.apply_overrides([(
      "session.skew_ms".to_string(),
      "soon".to_string()
    )]);
    assert!(cfg.session_skew().is_err());

    cfg.apply_overrides([(
      "users.page_size".to_string(),
      "0".to_string()
    )]);
    assert!(
      cfg
        .page_size("users.page_size", 10)
        .is_err()
    );
  }
}
