//! Parsers for field and method descriptors representing field types and method parameter/return
//! types respectively.
//!
//! Parsers are implemented with [`nom`] parser combinators, composing small parsers for each
//! production into larger ones.
//!
//! # Grammar
//!
//! Adapted from sections [4.3.2] and [4.3.3] of the Java Virtual Machine Specification:
//!
//! ```text
//! FieldDescriptor  ::= BaseType | ObjectType | ArrayType
//! BaseType         ::= 'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z'
//! ObjectType       ::= 'L' ClassName ';'
//! ArrayType        ::= '[' FieldDescriptor
//! MethodDescriptor ::= '(' FieldDescriptor* ')' ReturnDescriptor
//! ReturnDescriptor ::= FieldDescriptor | 'V'
//! ```
//!
//! [4.3.2]: https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.3.2
//! [4.3.3]: https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.3.3
use crate::class::descriptors::{FieldDescriptor, MethodDescriptor, ReturnDescriptor};
use crate::error::CompileError;
use nom::branch::alt;
use nom::bytes::complete::take_until1;
use nom::character::complete::char;
use nom::combinator::{map, value};
use nom::multi::many0;
use nom::sequence::tuple;
use nom::IResult;

/// Parses a field descriptor according to the grammar defined in section 4.3.2 of the Java
/// Virtual Machine Specification.
pub fn field_descriptor_parser(input: &str) -> IResult<&str, FieldDescriptor> {
    alt((
        value(FieldDescriptor::Byte, char('B')),
        value(FieldDescriptor::Char, char('C')),
        value(FieldDescriptor::Double, char('D')),
        value(FieldDescriptor::Float, char('F')),
        value(FieldDescriptor::Int, char('I')),
        value(FieldDescriptor::Long, char('J')),
        value(FieldDescriptor::Short, char('S')),
        value(FieldDescriptor::Boolean, char('Z')),
        map(
            tuple((char('L'), take_until1(";"), char(';'))),
            |(_, class_name, _): (_, &str, _)| FieldDescriptor::Object(class_name.to_string()),
        ),
        map(
            tuple((char('['), field_descriptor_parser)),
            |(_, component_type)| FieldDescriptor::Array(Box::new(component_type)),
        ),
    ))(input)
}

/// Parses a return descriptor according to the grammar defined in section 4.3.3 of the Java
/// Virtual Machine Specification.
pub fn return_descriptor_parser(input: &str) -> IResult<&str, ReturnDescriptor> {
    alt((
        value(ReturnDescriptor::Void, char('V')),
        map(field_descriptor_parser, ReturnDescriptor::Field),
    ))(input)
}

/// Parses a method descriptor according to the grammar defined in section 4.3.3 of the Java
/// Virtual Machine Specification.
pub fn method_descriptor_parser(input: &str) -> IResult<&str, MethodDescriptor> {
    map(
        tuple((
            char('('),
            many0(field_descriptor_parser),
            char(')'),
            return_descriptor_parser,
        )),
        |(_, params, _, returns)| MethodDescriptor::new(params, returns),
    )(input)
}

/// Streaming parser over a method descriptor string.
///
/// [`DescriptorParser::next`] yields each parameter type in order, then `None` once at the end of
/// the argument list, then the return type on the following call (`None` forever after a void
/// return).
pub struct DescriptorParser<'a> {
    rest: &'a str,
    in_params: bool,
    done: bool,
}

impl<'a> DescriptorParser<'a> {
    pub fn new(descriptor: &'a str) -> Result<Self, CompileError> {
        let rest = descriptor.strip_prefix('(').ok_or_else(|| {
            CompileError::decode(format!("method descriptor {} missing '('", descriptor))
        })?;
        Ok(Self { rest, in_params: true, done: false })
    }

    pub fn next(&mut self) -> Result<Option<FieldDescriptor>, CompileError> {
        if self.done {
            return Ok(None);
        }
        if self.in_params {
            if let Some(rest) = self.rest.strip_prefix(')') {
                // End of arguments: yield None once, the return type comes next
                self.rest = rest;
                self.in_params = false;
                return Ok(None);
            }
        } else if let Some(rest) = self.rest.strip_prefix('V') {
            self.rest = rest;
            self.done = true;
            return Ok(None);
        }
        let (rest, descriptor) = field_descriptor_parser(self.rest)
            .map_err(|_| CompileError::decode(format!("bad descriptor at {}", self.rest)))?;
        self.rest = rest;
        if !self.in_params {
            self.done = true;
        }
        Ok(Some(descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_descriptor_parser_parses_base_types() {
        for (input, expected) in [
            ("B", FieldDescriptor::Byte),
            ("C", FieldDescriptor::Char),
            ("D", FieldDescriptor::Double),
            ("F", FieldDescriptor::Float),
            ("I", FieldDescriptor::Int),
            ("J", FieldDescriptor::Long),
            ("S", FieldDescriptor::Short),
            ("Z", FieldDescriptor::Boolean),
        ] {
            let (rest, d) = field_descriptor_parser(input).unwrap();
            assert_eq!(format!("{}", d), input);
            assert_eq!((rest, d), ("", expected));
        }
    }

    #[test]
    fn field_descriptor_parser_parses_objects() {
        let (rest, d) = field_descriptor_parser("Ljava/lang/Thread;").unwrap();
        assert_eq!(format!("{}", d), "Ljava/lang/Thread;");
        assert_eq!(rest, "");
        assert_eq!(d, FieldDescriptor::Object(String::from("java/lang/Thread")));
    }

    #[test]
    fn field_descriptor_parser_parses_arrays() {
        let (rest, d) = field_descriptor_parser("[[[Ljava/lang/Object;").unwrap();
        assert_eq!(format!("{}", d), "[[[Ljava/lang/Object;");
        assert_eq!(rest, "");
        assert_eq!(
            d,
            FieldDescriptor::Array(Box::new(FieldDescriptor::Array(Box::new(
                FieldDescriptor::Array(Box::new(FieldDescriptor::Object(String::from(
                    "java/lang/Object"
                ))))
            ))))
        );
    }

    #[test]
    fn method_descriptor_parser_parses_methods() {
        let (rest, d) = method_descriptor_parser("(IDLjava/lang/Thread;)Ljava/lang/Object;").unwrap();
        assert_eq!(format!("{}", d), "(IDLjava/lang/Thread;)Ljava/lang/Object;");
        assert_eq!(rest, "");
        assert_eq!(d.params.len(), 3);
        assert_eq!(
            d.returns,
            ReturnDescriptor::Field(FieldDescriptor::Object(String::from("java/lang/Object")))
        );
    }

    // Canonical re-emission via Display round-trips every valid descriptor
    #[test]
    fn descriptor_display_round_trips() {
        for input in ["()V", "(II)I", "([[D)[Ljava/lang/String;", "(JFD)J"] {
            let (_, d) = method_descriptor_parser(input).unwrap();
            assert_eq!(format!("{}", d), input);
        }
    }

    #[test]
    fn streaming_parser_yields_params_then_return() -> anyhow::Result<()> {
        let mut p = DescriptorParser::new("(IJ)D")?;
        assert_eq!(p.next()?, Some(FieldDescriptor::Int));
        assert_eq!(p.next()?, Some(FieldDescriptor::Long));
        assert_eq!(p.next()?, None); // End of arguments
        assert_eq!(p.next()?, Some(FieldDescriptor::Double));
        assert_eq!(p.next()?, None);
        Ok(())
    }

    #[test]
    fn streaming_parser_void_return() -> anyhow::Result<()> {
        let mut p = DescriptorParser::new("()V")?;
        assert_eq!(p.next()?, None);
        assert_eq!(p.next()?, None);
        Ok(())
    }
}
