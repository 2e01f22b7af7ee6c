use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;

use crate::config::Config;

pub fn display_timezone(
  cfg: &Config
) -> anyhow::Result<Tz> {
  let raw = cfg
    .get("display.timezone")
    .unwrap_or_else(|| {
      "UTC".to_string()
    });
  raw.trim().parse::<Tz>().map_err(
    |err| {
      anyhow!(
        "invalid display.timezone \
         {raw:?}: {err}"
      )
    }
  )
}

#[must_use]
pub fn format_due(
  dt: DateTime<Utc>,
  tz: &Tz
) -> String {
  dt.with_timezone(tz)
    .format("%Y-%m-%d")
    .to_string()
}

fn relative_re()
-> anyhow::Result<&'static Regex> {
  static RE: OnceLock<Regex> =
    OnceLock::new();
  if let Some(re) = RE.get() {
    return Ok(re);
  }
  let re = Regex::new(
    r"^\+(?P<num>\d+)(?P<unit>[dw])$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;
  Ok(RE.get_or_init(|| re))
}

/// Parses a due date typed on the command
/// line: `today`, `tomorrow`, `+Nd`, `+Nw`,
/// `YYYY-MM-DD` or a full RFC 3339
/// timestamp. Day forms resolve to local
/// midnight in `tz`.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_due_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let today =
    now.with_timezone(tz).date_naive();

  match lower.as_str() {
    | "" => {
      return Err(anyhow!(
        "due date cannot be empty"
      ));
    }
    | "today" => {
      return local_midnight(today, tz);
    }
    | "tomorrow" => {
      return local_midnight(
        today + Duration::days(1),
        tz
      );
    }
    | _ => {}
  }

  if let Some(caps) =
    relative_re()?.captures(&lower)
  {
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let days = match caps
      .name("unit")
      .map(|m| m.as_str())
    {
      | Some("w") => num * 7,
      | _ => num
    };
    return local_midnight(
      today + Duration::days(days),
      tz
    );
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return local_midnight(date, tz);
  }

  DateTime::parse_from_rfc3339(token)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|_| {
      anyhow!(
        "unrecognized due date \
         {token:?}; use today, \
         tomorrow, +Nd, +Nw or \
         YYYY-MM-DD"
      )
    })
}

fn local_midnight(
  date: NaiveDate,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let naive: NaiveDateTime = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!(
        "failed to construct midnight \
         for {date}"
      )
    })?;
  match tz.from_local_datetime(&naive)
  {
    | LocalResult::Single(dt) => {
      Ok(dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      earliest,
      _
    ) => Ok(earliest.with_timezone(&Utc)),
    | LocalResult::None => Err(anyhow!(
      "midnight of {date} does not \
       exist in {tz}"
    ))
  }
}
