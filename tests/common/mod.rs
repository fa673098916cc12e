//! Shared fixture: a small site laid out the way the default recipe expects.

#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::Path;
use tempfile::TempDir;

pub const CONFIG: &str = r#"[project]
name = "fixture"

[site]
url = "https://fixture.test"

[watch]
debounce_ms = 50
"#;

pub const LAYOUT: &str = "doctype html
html
  head
    title Fixture
    link(rel=\"stylesheet\", href=\"/assets/css/style.css\")
  body
    block content
    script(src=\"/assets/js/main.js\")
";

pub const STYLE: &str = "@import '~kit/grid';
@import 'base/reset';
$brand: #336699;

// cards
.card {
  color: $brand;
  & .title { margin: 0 0 10px 0; }
}
";

/// Write `contents` to `root/rel`, creating parent directories.
pub fn write(root: &Path, rel: &str, contents: impl AsRef<[u8]>) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

pub fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel))
        .unwrap_or_else(|e| panic!("cannot read {}: {}", rel, e))
}

fn png() -> Vec<u8> {
    let img = image::RgbImage::from_fn(32, 32, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 128]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img).write_to(&mut buf, image::ImageOutputFormat::Png).unwrap();
    buf.into_inner()
}

/// Create a complete site: config, styles, two pages, scripts and images.
pub fn site() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    write(root, "assetflow.toml", CONFIG);
    write(root, "src/scss/style.scss", STYLE);
    write(root, "src/scss/base/_reset.scss", "body { margin: 0; }\n");
    write(root, "node_modules/kit/_grid.scss", ".kit-grid {\n  display: grid;\n  gap: 0px 16px;\n}\n");
    write(root, "src/pug/layouts/main.pug", LAYOUT);
    write(root, "src/pug/partials/nav.pug", "nav\n  a(href=\"/\") Home\n  a(href=\"/about.html\") About\n");
    write(
        root,
        "src/pug/pages/index.pug",
        "extends ../layouts/main\nblock content\n  include /partials/nav\n  h1.title Welcome\n",
    );
    write(
        root,
        "src/pug/pages/about.pug",
        "extends ../layouts/main\nblock content\n  include /partials/nav\n  h1 About\n  p We build sites.\n",
    );
    write(root, "src/js/lib/greet.js", "export function greet(name) {\n  return 'Hello, ' + name;\n}\n");
    write(
        root,
        "src/js/index.js",
        "import { greet } from './lib/greet';\n\n// entry\ndocument.title = greet('fixture');\n",
    );
    write(root, "src/img/logo.png", png());
    write(root, "src/img/icons/dot.svg", "<svg>\n  <!-- dot -->\n  <circle r=\"1\"/>\n</svg>\n");

    temp
}
