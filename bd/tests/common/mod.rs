//! Shared test fixtures: a scripted stand-in for the `beans` store CLI

use std::path::{Path, PathBuf};

/// Install a minimal file-per-item JSON store driven through the same CLI
/// surface the daemon uses in production
pub fn install_store(dir: &Path) -> PathBuf {
    let script = dir.join("beans");
    std::fs::write(&script, STORE_SCRIPT).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    script
}

/// Seed one item file in the store's single-line JSON layout
pub fn seed_item(store_dir: &Path, id: &str, title: &str, item_type: &str, status: &str) {
    std::fs::create_dir_all(store_dir).unwrap();
    let json = format!(
        concat!(
            r#"{{"id":"{id}","type":"{ty}","title":"{title}","body":"","status":"{status}","#,
            r#""priority":"normal","tags":[],"parent":null,"blocking":[],"#,
            r#""created-at":"2026-01-01T00:00:00Z","updated-at":"2026-01-01T00:00:00Z"}}"#
        ),
        id = id,
        ty = item_type,
        title = title,
        status = status,
    );
    std::fs::write(store_dir.join(format!("{}.json", id)), json).unwrap();
}

const STORE_SCRIPT: &str = r#"#!/bin/sh
# Minimal file-per-item JSON store, same CLI surface as the real one.
set -eu

DIR=""
while [ $# -gt 0 ]; do
  case "$1" in
    --dir) DIR="$2"; shift 2 ;;
    --format) shift 2 ;;
    *) break ;;
  esac
done
[ -n "$DIR" ] || { echo "missing --dir" >&2; exit 2; }
mkdir -p "$DIR"
OP="$1"; shift

now() { date -u +%Y-%m-%dT%H:%M:%SZ; }

case "$OP" in
  list)
    STATUS=""
    while [ $# -gt 0 ]; do
      case "$1" in
        --status) STATUS="$2"; shift 2 ;;
        --type) shift 2 ;;
        *) shift ;;
      esac
    done
    out=""
    for f in "$DIR"/*.json; do
      [ -e "$f" ] || continue
      if [ -n "$STATUS" ] && ! grep -q "\"status\":\"$STATUS\"" "$f"; then continue; fi
      item=$(cat "$f")
      if [ -z "$out" ]; then out="$item"; else out="$out,$item"; fi
    done
    echo "[$out]"
    ;;
  show)
    f="$DIR/$1.json"
    [ -e "$f" ] || { echo "error: item $1 not found" >&2; exit 1; }
    cat "$f"
    ;;
  update)
    ID="$1"; shift
    f="$DIR/$ID.json"
    [ -e "$f" ] || { echo "error: item $ID not found" >&2; exit 1; }
    while [ $# -gt 0 ]; do
      case "$1" in
        --status)
          sed -i "s/\"status\":\"[a-z-]*\"/\"status\":\"$2\"/" "$f"; shift 2 ;;
        --parent)
          sed -i "s/\"parent\":\"[^\"]*\"/\"parent\":\"$2\"/; s/\"parent\":null/\"parent\":\"$2\"/" "$f"; shift 2 ;;
        --add-blocking)
          if grep -q '"blocking":\[\]' "$f"; then
            sed -i "s/\"blocking\":\[\]/\"blocking\":[\"$2\"]/" "$f"
          else
            sed -i "s/\"blocking\":\[/\"blocking\":[\"$2\",/" "$f"
          fi
          shift 2 ;;
        *) shift ;;
      esac
    done
    sed -i "s/\"updated-at\":\"[^\"]*\"/\"updated-at\":\"$(now)\"/" "$f"
    cat "$f"
    ;;
  tag)
    ID="$1"; shift
    f="$DIR/$ID.json"
    [ -e "$f" ] || { echo "error: item $ID not found" >&2; exit 1; }
    while [ $# -gt 0 ]; do
      case "$1" in
        --add)
          if ! grep -q "\"tags\":\[[^]]*\"$2\"" "$f"; then
            if grep -q '"tags":\[\]' "$f"; then
              sed -i "s/\"tags\":\[\]/\"tags\":[\"$2\"]/" "$f"
            else
              sed -i "s/\"tags\":\[/\"tags\":[\"$2\",/" "$f"
            fi
          fi
          shift 2 ;;
        --remove)
          sed -i "s/\"tags\":\(\[[^]]*\)\"$2\"/\"tags\":\1/; s/\"tags\":\[,/\"tags\":[/; s/,,/,/; s/,\]/]/" "$f"
          shift 2 ;;
        *) shift ;;
      esac
    done
    sed -i "s/\"updated-at\":\"[^\"]*\"/\"updated-at\":\"$(now)\"/" "$f"
    cat "$f"
    ;;
  create)
    ID=""; TITLE=""; TYPE="task"; STATUS="todo"; PRIORITY="normal"; PARENT=null
    while [ $# -gt 0 ]; do
      case "$1" in
        --id) ID="$2"; shift 2 ;;
        --title) TITLE="$2"; shift 2 ;;
        --type) TYPE="$2"; shift 2 ;;
        --status) STATUS="$2"; shift 2 ;;
        --priority) PRIORITY="$2"; shift 2 ;;
        --parent) PARENT="\"$2\""; shift 2 ;;
        *) shift ;;
      esac
    done
    [ -n "$ID" ] || ID="gen-$$-$(date +%s%N)"
    BODY=$(sed 's/\\/\\\\/g; s/"/\\"/g' | awk '{printf "%s\\n", $0}')
    f="$DIR/$ID.json"
    printf '{"id":"%s","type":"%s","title":"%s","body":"%s","status":"%s","priority":"%s","tags":[],"parent":%s,"blocking":[],"created-at":"%s","updated-at":"%s"}' \
      "$ID" "$TYPE" "$TITLE" "$BODY" "$STATUS" "$PRIORITY" "$PARENT" "$(now)" "$(now)" > "$f"
    cat "$f"
    ;;
  *)
    echo "unknown op: $OP" >&2
    exit 2
    ;;
esac
"#;
