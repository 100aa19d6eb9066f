use helios_xml_serde::schema::ElementInfo;
use helios_xml_serde::{
    Result, TypeDescriptor, TypeRef, Xml, XmlAnnotation, XmlConfig, XmlError, XmlSchema,
    from_xml_str, to_xml_string,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Circle {
    radius: f64,
}

impl XmlSchema for Circle {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Circle").field("radius", TypeRef::of::<f64>())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Square {
    side: u32,
}

impl XmlSchema for Square {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Square").field("side", TypeRef::of::<u32>())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
enum Shape {
    Circle(Circle),
    Square(Square),
}

impl XmlSchema for Shape {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::sealed("Shape")
            .subtype("Circle", TypeRef::of::<Circle>())
            .subtype("Square", TypeRef::of::<Square>())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Drawing {
    shape: Shape,
    shapes: Vec<Shape>,
}

impl XmlSchema for Drawing {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Drawing")
            .field("shape", TypeRef::of::<Shape>())
            .element(
                ElementInfo::new("shapes", TypeRef::of::<Vec<Shape>>()).annotate(
                    XmlAnnotation::PolyChildren(vec![
                        "Circle".to_string(),
                        "Square=sq".to_string(),
                    ]),
                ),
            )
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Leaf {
    v: u32,
}

impl XmlSchema for Leaf {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Leaf").field("v", TypeRef::of::<u32>())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Wrap {
    inner: Box<Expr>,
}

impl XmlSchema for Wrap {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("Wrap").field("inner", TypeRef::of::<Box<Expr>>())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
enum Expr {
    Leaf(Leaf),
    Wrap(Wrap),
}

impl XmlSchema for Expr {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::sealed("Expr")
            .subtype("Leaf", TypeRef::of::<Leaf>())
            .subtype("Wrap", TypeRef::of::<Wrap>())
    }
}

#[test]
fn test_xml_tagged_and_transparent_polymorphism() -> Result<()> {
    let drawing = Drawing {
        shape: Shape::Circle(Circle { radius: 1.5 }),
        shapes: vec![
            Shape::Circle(Circle { radius: 2.0 }),
            Shape::Square(Square { side: 3 }),
        ],
    };

    let xml = to_xml_string(&drawing)?;
    assert_eq!(
        xml,
        concat!(
            r#"<Drawing><shape type="Circle" radius="1.5"/>"#,
            r#"<Circle radius="2"/><sq side="3"/></Drawing>"#
        )
    );

    let decoded: Drawing = from_xml_str(&xml)?;
    assert_eq!(decoded, drawing);
    Ok(())
}

#[test]
fn test_xml_transparent_items_must_be_contiguous() -> Result<()> {
    let decoded: Result<Drawing> = from_xml_str(concat!(
        r#"<Drawing><sq side="1"/><shape type="Square" side="9"/>"#,
        r#"<Circle radius="0.5"/></Drawing>"#
    ));
    assert!(decoded.is_err());

    let decoded: Drawing = from_xml_str(concat!(
        r#"<Drawing><shape type="Square" side="9"/>"#,
        r#"<sq side="1"/><Circle radius="0.5"/></Drawing>"#
    ))?;
    assert_eq!(decoded.shape, Shape::Square(Square { side: 9 }));
    assert_eq!(
        decoded.shapes,
        vec![
            Shape::Square(Square { side: 1 }),
            Shape::Circle(Circle { radius: 0.5 }),
        ]
    );
    Ok(())
}

#[test]
fn test_xml_unknown_polymorphic_type() {
    let result: Result<Drawing> = from_xml_str(r#"<Drawing><shape type="Hexagon"/></Drawing>"#);
    match result {
        Err(XmlError::UnknownPolymorphicType { name, candidates }) => {
            assert_eq!(name, "Hexagon");
            assert_eq!(candidates, vec!["Circle".to_string(), "Square".to_string()]);
        }
        other => panic!("expected an unknown type error, got {:?}", other),
    }
}

#[test]
fn test_xml_missing_discriminator() {
    let result: Result<Drawing> = from_xml_str(r#"<Drawing><shape radius="1"/></Drawing>"#);
    assert!(matches!(result, Err(XmlError::MissingField { .. })));
}

#[test]
fn test_xml_recursive_transparent_round_trip() -> Result<()> {
    let codec = Xml::new(XmlConfig::builder().auto_polymorphic(true).build());
    let expr = Wrap {
        inner: Box::new(Expr::Wrap(Wrap {
            inner: Box::new(Expr::Leaf(Leaf { v: 1 })),
        })),
    };

    let xml = codec.to_string(&expr)?;
    assert_eq!(xml, r#"<Wrap><Wrap><Leaf v="1"/></Wrap></Wrap>"#);

    let decoded: Wrap = codec.from_str(&xml)?;
    assert_eq!(decoded, expr);
    Ok(())
}
