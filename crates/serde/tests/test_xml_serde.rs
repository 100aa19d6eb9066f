use std::collections::BTreeMap;

use helios_xml_serde::schema::ElementInfo;
use helios_xml_serde::{
    EncodeDefault, Result, TypeDescriptor, TypeRef, Xml, XmlAnnotation, XmlConfig, XmlError,
    XmlName, XmlSchema, from_xml_str, to_xml_string,
};
use serde::{Deserialize, Serialize};

const RESTAURANT: &str = "https://schema.restaurant.info";

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Food {
    name: Option<String>,
    price: Option<String>,
    istasty: String,
}

impl XmlSchema for Food {
    fn type_descriptor() -> TypeDescriptor {
        let plain_element = |name: &str| {
            ElementInfo::new(name, TypeRef::of::<Option<String>>())
                .annotate(XmlAnnotation::Element(true))
                .annotate(XmlAnnotation::SerialName(XmlName::new(name).namespace("")))
        };
        TypeDescriptor::class("Food")
            .annotate(XmlAnnotation::SerialName(
                XmlName::new("food").namespace(RESTAURANT).prefix("ns"),
            ))
            .element(plain_element("name"))
            .element(plain_element("price"))
            .element(
                ElementInfo::new("istasty", TypeRef::of::<String>())
                    .annotate(XmlAnnotation::Element(false))
                    .annotate(XmlAnnotation::SerialName(
                        XmlName::new("istasty").namespace(RESTAURANT).prefix("ns"),
                    )),
            )
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Note {
    lang: String,
    text: String,
}

impl XmlSchema for Note {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Note")
            .field("lang", TypeRef::of::<String>())
            .element(ElementInfo::new("text", TypeRef::of::<String>()).annotate(XmlAnnotation::Value))
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Settings {
    mode: String,
    retries: u32,
}

impl XmlSchema for Settings {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Settings")
            .element(
                ElementInfo::new("mode", TypeRef::of::<String>())
                    .annotate(XmlAnnotation::Default("auto".to_string())),
            )
            .element(
                ElementInfo::new("retries", TypeRef::of::<u32>())
                    .annotate(XmlAnnotation::Default("3".to_string())),
            )
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Article {
    footer: String,
    body: String,
    id: u32,
    title: String,
}

impl XmlSchema for Article {
    fn type_descriptor() -> TypeDescriptor {
        let element = |name: &str| {
            ElementInfo::new(name, TypeRef::of::<String>()).annotate(XmlAnnotation::Element(true))
        };
        TypeDescriptor::class("Article")
            .element(element("footer").annotate(XmlAnnotation::After(vec!["*".to_string()])))
            .element(element("body"))
            .field("id", TypeRef::of::<u32>())
            .element(element("title").annotate(XmlAnnotation::Before(vec!["body".to_string()])))
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Item {
    n: u32,
}

impl XmlSchema for Item {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Item").field("n", TypeRef::of::<u32>())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Menu {
    food: Vec<Item>,
    tags: Vec<String>,
    scores: BTreeMap<String, u32>,
}

impl XmlSchema for Menu {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Menu")
            .field("food", TypeRef::of::<Vec<Item>>())
            .element(
                ElementInfo::new("tags", TypeRef::of::<Vec<String>>())
                    .annotate(XmlAnnotation::ChildrenName(XmlName::new("tag"))),
            )
            .field("scores", TypeRef::of::<BTreeMap<String, u32>>())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
enum Color {
    Red,
    Green,
}

impl XmlSchema for Color {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::enumeration("Color", ["Red", "Green"])
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Swatch {
    color: Color,
    visible: bool,
}

impl XmlSchema for Swatch {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Swatch")
            .field("color", TypeRef::of::<Color>())
            .field("visible", TypeRef::of::<bool>())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Extremes {
    low: i128,
    high: u128,
}

impl XmlSchema for Extremes {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Extremes")
            .field("low", TypeRef::of::<i128>())
            .field("high", TypeRef::of::<u128>())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Snippet {
    lang: String,
    code: String,
}

impl XmlSchema for Snippet {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Snippet")
            .field("lang", TypeRef::of::<String>())
            .element(ElementInfo::new("code", TypeRef::of::<String>()).annotate(XmlAnnotation::CData))
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Script {
    body: String,
}

impl XmlSchema for Script {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Script").element(
            ElementInfo::new("body", TypeRef::of::<String>())
                .annotate(XmlAnnotation::Value)
                .annotate(XmlAnnotation::CData),
        )
    }
}

#[test]
fn test_xml_food_namespaced_attribute() -> Result<()> {
    let food = Food {
        name: Some("burgers".to_string()),
        price: None,
        istasty: "veryTasty".to_string(),
    };

    let xml = to_xml_string(&food)?;
    assert_eq!(
        xml,
        r#"<ns:food xmlns:ns="https://schema.restaurant.info" ns:istasty="veryTasty"><name>burgers</name></ns:food>"#
    );

    let decoded: Food = from_xml_str(&xml)?;
    assert_eq!(decoded, food);
    Ok(())
}

#[test]
fn test_xml_value_child_and_entities() -> Result<()> {
    let note = Note {
        lang: "en".to_string(),
        text: "fish & chips".to_string(),
    };

    let xml = to_xml_string(&note)?;
    assert_eq!(xml, r#"<Note lang="en">fish &amp; chips</Note>"#);

    let decoded: Note = from_xml_str(&xml)?;
    assert_eq!(decoded, note);
    Ok(())
}

#[test]
fn test_xml_unknown_entity_is_rejected() {
    let result: Result<Note> = from_xml_str(r#"<Note lang="en">fish &bogus; chips</Note>"#);
    assert!(matches!(result, Err(XmlError::UnknownEntity(_))));
}

#[test]
fn test_xml_default_values_are_elided() -> Result<()> {
    let settings = Settings {
        mode: "auto".to_string(),
        retries: 3,
    };

    assert_eq!(to_xml_string(&settings)?, "<Settings/>");

    let always = Xml::new(XmlConfig::builder().encode_default(EncodeDefault::Always).build());
    assert_eq!(
        always.to_string(&settings)?,
        r#"<Settings mode="auto" retries="3"/>"#
    );

    let changed = Settings {
        mode: "manual".to_string(),
        retries: 3,
    };
    assert_eq!(to_xml_string(&changed)?, r#"<Settings mode="manual"/>"#);

    let decoded: Settings = from_xml_str("<Settings/>")?;
    assert_eq!(decoded, settings);
    Ok(())
}

#[test]
fn test_xml_sibling_order_constraints() -> Result<()> {
    let article = Article {
        footer: "F".to_string(),
        body: "B".to_string(),
        id: 7,
        title: "T".to_string(),
    };

    let xml = to_xml_string(&article)?;
    assert_eq!(
        xml,
        r#"<Article id="7"><title>T</title><body>B</body><footer>F</footer></Article>"#
    );

    let decoded: Article = from_xml_str(&xml)?;
    assert_eq!(decoded, article);
    Ok(())
}

#[test]
fn test_xml_collections() -> Result<()> {
    let mut scores = BTreeMap::new();
    scores.insert("a".to_string(), 1);
    scores.insert("b".to_string(), 2);
    let menu = Menu {
        food: vec![Item { n: 1 }, Item { n: 2 }],
        tags: vec!["hot".to_string(), "cheap".to_string()],
        scores,
    };

    let xml = to_xml_string(&menu)?;
    assert_eq!(
        xml,
        concat!(
            r#"<Menu><food n="1"/><food n="2"/>"#,
            r#"<tags><tag>hot</tag><tag>cheap</tag></tags>"#,
            r#"<scores key="a" value="1"/><scores key="b" value="2"/></Menu>"#
        )
    );

    let decoded: Menu = from_xml_str(&xml)?;
    assert_eq!(decoded, menu);
    Ok(())
}

#[test]
fn test_xml_empty_collections_decode_empty() -> Result<()> {
    let decoded: Menu = from_xml_str("<Menu><tags/></Menu>")?;
    assert!(decoded.food.is_empty());
    assert!(decoded.tags.is_empty());
    assert!(decoded.scores.is_empty());
    Ok(())
}

#[test]
fn test_xml_enum_and_boolean_text() -> Result<()> {
    let swatch = Swatch {
        color: Color::Green,
        visible: true,
    };
    let xml = to_xml_string(&swatch)?;
    assert_eq!(xml, r#"<Swatch color="Green" visible="true"/>"#);

    let lenient: Swatch = from_xml_str(r#"<Swatch color="green" visible="1"/>"#)?;
    assert_eq!(lenient, swatch);

    let strict = Xml::new(XmlConfig::builder().strict_boolean(true).build());
    let result: Result<Swatch> = strict.from_str(r#"<Swatch color="Green" visible="1"/>"#);
    assert!(matches!(result, Err(XmlError::InvalidValue { .. })));
    Ok(())
}

#[test]
fn test_xml_missing_required_field() {
    let result: Result<Swatch> = from_xml_str(r#"<Swatch color="Red"/>"#);
    match result {
        Err(XmlError::MissingField { field, .. }) => assert_eq!(field, "visible"),
        other => panic!("expected a missing field error, got {:?}", other),
    }
}

#[test]
fn test_xml_unknown_content() -> Result<()> {
    let input = r#"<Swatch color="Red" visible="false"><shade>dark</shade></Swatch>"#;

    let strict: Result<Swatch> = from_xml_str(input);
    assert!(matches!(strict, Err(XmlError::UnknownContent { .. })));

    let lenient = Xml::new(XmlConfig::builder().ignore_unknown_content(true).build());
    let decoded: Swatch = lenient.from_str(input)?;
    assert_eq!(
        decoded,
        Swatch {
            color: Color::Red,
            visible: false,
        }
    );
    Ok(())
}

#[test]
fn test_xml_wrong_root_element() {
    let result: Result<Swatch> = from_xml_str(r#"<Palette color="Red" visible="false"/>"#);
    assert!(matches!(result, Err(XmlError::UnknownContent { .. })));
}

#[test]
fn test_xml_root_list_and_map() -> Result<()> {
    let items = vec![Item { n: 1 }, Item { n: 2 }];
    let xml = to_xml_string(&items)?;
    assert_eq!(xml, r#"<List><Item n="1"/><Item n="2"/></List>"#);
    let decoded: Vec<Item> = from_xml_str(&xml)?;
    assert_eq!(decoded, items);

    let mut scores = BTreeMap::new();
    scores.insert("a".to_string(), 1u32);
    scores.insert("b".to_string(), 2u32);
    let xml = to_xml_string(&scores)?;
    assert_eq!(
        xml,
        r#"<Map><entry key="a" value="1"/><entry key="b" value="2"/></Map>"#
    );
    let decoded: BTreeMap<String, u32> = from_xml_str(&xml)?;
    assert_eq!(decoded, scores);
    Ok(())
}

#[test]
fn test_xml_128_bit_integers() -> Result<()> {
    let extremes = Extremes {
        low: i128::MIN,
        high: u128::MAX,
    };
    let xml = to_xml_string(&extremes)?;
    assert_eq!(
        xml,
        format!(r#"<Extremes low="{}" high="{}"/>"#, i128::MIN, u128::MAX)
    );
    let decoded: Extremes = from_xml_str(&xml)?;
    assert_eq!(decoded, extremes);
    Ok(())
}

#[test]
fn test_xml_cdata_sections() -> Result<()> {
    let snippet = Snippet {
        lang: "rs".to_string(),
        code: "a < b && c".to_string(),
    };
    let xml = to_xml_string(&snippet)?;
    assert_eq!(
        xml,
        r#"<Snippet lang="rs"><code><![CDATA[a < b && c]]></code></Snippet>"#
    );
    let decoded: Snippet = from_xml_str(&xml)?;
    assert_eq!(decoded, snippet);

    let script = Script {
        body: "if (x < 1) {}".to_string(),
    };
    let xml = to_xml_string(&script)?;
    assert_eq!(xml, "<Script><![CDATA[if (x < 1) {}]]></Script>");
    let decoded: Script = from_xml_str(&xml)?;
    assert_eq!(decoded, script);
    Ok(())
}
