//! Structured product data embedded in item pages.
//!
//! Browser-mediated adapters read detail pages as rendered HTML and pull
//! JSON-LD `Product` blocks, OpenGraph/Twitter meta tags and the Next.js
//! `__NEXT_DATA__` payload out of them with the `scraper` crate.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

/// Everything structured we can read from one item page.
#[derive(Debug, Clone, Default)]
pub struct PageMetadata {
    /// First JSON-LD `Product` on the page.
    pub product: Option<JsonLdProduct>,
    pub og: OpenGraphData,
    /// `<meta name=...>` tags other than OpenGraph, in document order.
    pub meta: Vec<(String, String)>,
    /// Parsed `<script id="__NEXT_DATA__">` payload.
    pub next_data: Option<Value>,
}

impl PageMetadata {
    pub fn meta_content(&self, name: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Non-empty string at a JSON pointer inside `__NEXT_DATA__`.
    pub fn next_data_text(&self, pointer: &str) -> Option<String> {
        self.next_data
            .as_ref()?
            .pointer(pointer)?
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Product data extracted from JSON-LD.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonLdProduct {
    pub name: Option<String>,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub price: Option<f64>,
    pub price_currency: Option<String>,
    /// `itemCondition`, with the schema.org prefix stripped.
    pub condition: Option<String>,
    pub seller: Option<String>,
    pub images: Vec<String>,
}

/// OpenGraph metadata.
#[derive(Debug, Clone, Default)]
pub struct OpenGraphData {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub url: Option<String>,
    pub price_amount: Option<String>,
    pub price_currency: Option<String>,
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

/// Extract JSON-LD, OpenGraph, meta tags and `__NEXT_DATA__` from HTML.
pub fn extract_page_metadata(html: &str) -> PageMetadata {
    let document = Html::parse_document(html);
    let mut md = PageMetadata::default();

    extract_jsonld(&document, &mut md);
    extract_meta(&document, &mut md);

    let next_sel = selector(r#"script#__NEXT_DATA__"#);
    md.next_data = document
        .select(&next_sel)
        .next()
        .and_then(|el| serde_json::from_str(el.inner_html().trim()).ok());

    md
}

fn extract_jsonld(document: &Html, md: &mut PageMetadata) {
    let sel = selector(r#"script[type="application/ld+json"]"#);
    for element in document.select(&sel) {
        let text = element.inner_html();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            continue;
        };
        if let Some(product) = find_product(&value) {
            md.product = Some(parse_product(product));
            return;
        }
    }
}

/// Find a `Product` node at the top level, in an array, or in `@graph`.
fn find_product(value: &Value) -> Option<&Value> {
    if let Some(items) = value.as_array() {
        return items.iter().find_map(find_product);
    }
    if let Some(graph) = value.get("@graph").and_then(|g| g.as_array()) {
        return graph.iter().find_map(find_product);
    }
    let is_product = match value.get("@type") {
        Some(Value::String(t)) => t == "Product" || t == "ProductGroup",
        Some(Value::Array(ts)) => ts.iter().any(|t| t.as_str() == Some("Product")),
        _ => false,
    };
    is_product.then_some(value)
}

fn as_number(v: &Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.replace(',', "").parse().ok()))
}

fn as_string(v: Option<&Value>) -> Option<String> {
    v.and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn parse_product(v: &Value) -> JsonLdProduct {
    let offer = v.get("offers").and_then(|o| match o {
        Value::Array(arr) => arr.first(),
        other => Some(other),
    });

    let images = match v.get("image") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|i| {
                i.as_str()
                    .or_else(|| i.get("url").and_then(|u| u.as_str()))
                    .or_else(|| i.get("contentUrl").and_then(|u| u.as_str()))
                    .map(|s| s.to_string())
            })
            .collect(),
        Some(obj @ Value::Object(_)) => as_string(obj.get("url")).into_iter().collect(),
        _ => Vec::new(),
    };

    let condition = as_string(v.get("itemCondition"))
        .or_else(|| offer.and_then(|o| as_string(o.get("itemCondition"))))
        .map(|c| {
            c.rsplit('/')
                .next()
                .unwrap_or(&c)
                .trim_end_matches("Condition")
                .to_string()
        });

    JsonLdProduct {
        name: as_string(v.get("name")),
        description: as_string(v.get("description")),
        brand: v
            .get("brand")
            .and_then(|b| b.get("name").and_then(|n| n.as_str()).or_else(|| b.as_str()))
            .map(|s| s.to_string()),
        price: offer.and_then(|o| o.get("price")).and_then(as_number),
        price_currency: offer.and_then(|o| as_string(o.get("priceCurrency"))),
        condition,
        seller: offer
            .and_then(|o| o.get("seller"))
            .and_then(|s| s.get("name").and_then(|n| n.as_str()).or_else(|| s.as_str()))
            .map(|s| s.to_string()),
        images,
    }
}

fn extract_meta(document: &Html, md: &mut PageMetadata) {
    let sel = selector("meta[content]");
    for element in document.select(&sel) {
        let attrs = element.value();
        let content = attrs.attr("content").unwrap_or("").trim().to_string();
        if let Some(property) = attrs.attr("property") {
            match property {
                "og:title" => md.og.title = Some(content),
                "og:description" => md.og.description = Some(content),
                "og:image" => md.og.image = Some(content),
                "og:url" => md.og.url = Some(content),
                "og:price:amount" | "product:price:amount" => {
                    md.og.price_amount = Some(content)
                }
                "og:price:currency" | "product:price:currency" => {
                    md.og.price_currency = Some(content)
                }
                _ => {}
            }
        } else if let Some(name) = attrs.attr("name") {
            md.meta.push((name.to_string(), content));
        }
    }
}

/// Whitespace-normalized text content of an element.
pub fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the first element matching `css`, if non-empty.
pub fn first_text(document: &Html, css: &str) -> Option<String> {
    let sel = Selector::parse(css).ok()?;
    document
        .select(&sel)
        .map(|el| element_text(&el))
        .find(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <meta property="og:title" content="Vintage Levi's 501">
        <meta property="og:description" content="Sold by @denimdealer on the app">
        <meta name="twitter:data1" content="@denimdealer">
        <script type="application/ld+json">{"@type":"BreadcrumbList","itemListElement":[]}</script>
        <script type="application/ld+json">
        {"@context":"https://schema.org","@type":"Product","name":"Vintage Levi's 501",
         "description":"Straight leg, W32 L30",
         "image":["https://img.test/1.jpg","https://img.test/2.jpg"],
         "brand":{"@type":"Brand","name":"Levi's"},
         "itemCondition":"https://schema.org/UsedCondition",
         "offers":{"@type":"Offer","price":"45.00","priceCurrency":"USD",
                   "availability":"https://schema.org/InStock","seller":{"name":"denimdealer"}}}
        </script>
        <script id="__NEXT_DATA__" type="application/json">
        {"props":{"pageProps":{"id":"abc","item":{"seller":{"name":" denimdealer "},"note":""}}}}
        </script>
        </head><body><p class="desc">  Straight   leg </p></body></html>"#;

    #[test]
    fn test_extracts_jsonld_product() {
        let md = extract_page_metadata(PAGE);
        let product = md.product.expect("product present");
        assert_eq!(product.name.as_deref(), Some("Vintage Levi's 501"));
        assert_eq!(product.brand.as_deref(), Some("Levi's"));
        assert_eq!(product.price, Some(45.0));
        assert_eq!(product.price_currency.as_deref(), Some("USD"));
        assert_eq!(product.condition.as_deref(), Some("Used"));
        assert_eq!(product.seller.as_deref(), Some("denimdealer"));
        assert_eq!(product.images.len(), 2);
    }

    #[test]
    fn test_extracts_meta_and_next_data() {
        let md = extract_page_metadata(PAGE);
        assert_eq!(md.og.title.as_deref(), Some("Vintage Levi's 501"));
        assert_eq!(md.meta_content("TWITTER:DATA1"), Some("@denimdealer"));
        assert_eq!(md.next_data_text("/props/pageProps/id").as_deref(), Some("abc"));
        assert_eq!(
            md.next_data_text("/props/pageProps/item/seller/name").as_deref(),
            Some("denimdealer")
        );
        assert_eq!(md.next_data_text("/props/pageProps/item/note"), None);
        assert_eq!(md.next_data_text("/props/pageProps/missing"), None);
    }

    #[test]
    fn test_product_inside_graph() {
        let html = r#"<script type="application/ld+json">
            {"@graph":[{"@type":"WebPage"},
              {"@type":["Product"],"name":"Lamp","image":{"url":"https://img.test/l.jpg"}}]}
            </script>"#;
        let product = extract_page_metadata(html).product.unwrap();
        assert_eq!(product.name.as_deref(), Some("Lamp"));
        assert_eq!(product.images, vec!["https://img.test/l.jpg"]);
    }

    #[test]
    fn test_garbled_jsonld_is_ignored() {
        let html = r#"<script type="application/ld+json">{"@type":"Product","name":</script>"#;
        assert!(extract_page_metadata(html).product.is_none());
    }

    #[test]
    fn test_first_text_normalizes_whitespace() {
        let doc = Html::parse_document(PAGE);
        assert_eq!(first_text(&doc, "p.desc").as_deref(), Some("Straight leg"));
        assert_eq!(first_text(&doc, "p.missing"), None);
    }
}
