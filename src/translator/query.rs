use crate::domain::{ImagerySettings, OperationMode};
use crate::translator::record::RequestRecord;

/// How a static map request places its map, derived from the locator fields.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Locator {
    CenterPoint { pushpins: bool },
    MapArea { pushpins: bool },
    Pushpins,
    Query { pushpins: bool },
    /// No supported combination, e.g. `centerPoint` without `zoomLevel`.
    Unresolved,
}

impl Locator {
    pub fn of(record: &RequestRecord) -> Self {
        let center = record.has("centerPoint");
        let zoom = record.has("zoomLevel");
        let area = record.has("ma");
        let pins = record.has("pp");
        let query = record.has("query");

        if center && zoom && !area && !query {
            Locator::CenterPoint { pushpins: pins }
        } else if area && !center && !query {
            Locator::MapArea { pushpins: pins }
        } else if pins && !area && !center && !query {
            Locator::Pushpins
        } else if query && !area && !center {
            Locator::Query { pushpins: pins }
        } else {
            Locator::Unresolved
        }
    }
}

/// Builds the request URL for an already validated record.
pub fn build_url(settings: &ImagerySettings, record: &RequestRecord) -> String {
    match settings.mode {
        OperationMode::StaticMap => static_map_url(settings, record),
        OperationMode::ImageryMetadata => imagery_metadata_url(settings, record),
    }
}

pub fn static_map_url(settings: &ImagerySettings, record: &RequestRecord) -> String {
    let mut url = format!(
        "{}{}",
        settings.static_map_url,
        record.render("imagerySet")
    );

    let pushpins = record.render_joined("pp", "&pp=");

    match Locator::of(record) {
        Locator::CenterPoint { pushpins: false } => {
            url.push_str(&format!(
                "/{}/{}?",
                record.render("centerPoint"),
                record.render("zoomLevel")
            ));
        }
        Locator::CenterPoint { pushpins: true } => {
            url.push_str(&format!(
                "/{}/{}?pp={pushpins}&",
                record.render("centerPoint"),
                record.render("zoomLevel")
            ));
        }
        Locator::MapArea { pushpins: false } => {
            url.push_str(&format!("?ma={}&", record.render("ma")));
        }
        // The upstream contract has always been sent without `&` between `ma` and `pp`.
        Locator::MapArea { pushpins: true } => {
            url.push_str(&format!("?ma={}pp={pushpins}&", record.render("ma")));
        }
        Locator::Pushpins => {
            url.push_str(&format!("?pp={pushpins}&"));
        }
        Locator::Query { pushpins: false } => {
            url.push_str(&format!("/{}?", record.render("query")));
        }
        Locator::Query { pushpins: true } => {
            url.push_str(&format!("/{}?pp={pushpins}&", record.render("query")));
        }
        Locator::Unresolved => {}
    }

    url.push_str(&format!(
        "dcl={}&ms={}&ml={}&fmt={}&mmd={}&o={}&key={}",
        record.render("dcl"),
        record.render("ms"),
        record.render("ml"),
        record.render("fmt"),
        record.render("mmd"),
        record.render("o"),
        settings.api_key
    ));

    url
}

pub fn imagery_metadata_url(settings: &ImagerySettings, record: &RequestRecord) -> String {
    let mut url = format!(
        "{}{}",
        settings.imagery_metadata_url,
        record.render("imagerySet")
    );

    if record.has("centerPoint") {
        url.push_str(&format!(
            "/{}?zl={}&",
            record.render("centerPoint"),
            record.render("zl")
        ));
    } else {
        url.push('?');
    }

    url.push_str(&format!(
        "key={}&dir={}&incl={}&o={}",
        settings.api_key,
        record.render("dir"),
        record.render("incl"),
        record.render("o")
    ));

    url
}

/// Drops the query string so URLs can be logged without the API key.
pub fn redact_query(url: &str) -> &str {
    url.split_once('?').map(|(path, _)| path).unwrap_or(url)
}
