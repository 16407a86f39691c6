use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{anychar, char, multispace0, one_of},
    combinator::{all_consuming, map, opt},
    error::{context, VerboseError},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};

use super::{ExpressionError, ExpressionResult};

pub type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

const DELIMITERS: &str = "/|&^!()?";

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// One of `/ | & ^ ! ( ) ?`.
    Delimiter(char),
    /// Anything between delimiters. `quoted` holds a trailing `"..."` literal,
    /// unescaped, which is how delimiter characters get into a step.
    Segment {
        text: String,
        quoted: Option<String>,
    },
}

impl Token {
    pub fn is(&self, delimiter: char) -> bool {
        matches!(self, Token::Delimiter(c) if *c == delimiter)
    }
}

#[tracing::instrument(level = "debug", skip(input))]
fn parse_delimiter(input: &str) -> ParserResult<Token> {
    context("delimiter", map(one_of(DELIMITERS), Token::Delimiter))(input)
}

fn parse_escape(input: &str) -> ParserResult<String> {
    map(preceded(char('\\'), anychar), |c| {
        match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            other => other,
        }
        .to_string()
    })(input)
}

fn parse_quoted_part(input: &str) -> ParserResult<String> {
    map(take_while1(|c| c != '"' && c != '\\'), |s: &str| {
        s.to_string()
    })(input)
}

#[tracing::instrument(level = "debug", skip(input))]
fn parse_quoted(input: &str) -> ParserResult<String> {
    context(
        "string literal",
        map(
            delimited(
                char('"'),
                many0(alt((parse_escape, parse_quoted_part))),
                char('"'),
            ),
            |parts| parts.concat(),
        ),
    )(input)
}

fn parse_bare(input: &str) -> ParserResult<&str> {
    take_while1(|c: char| !DELIMITERS.contains(c) && c != '"')(input)
}

#[tracing::instrument(level = "debug", skip(input))]
fn parse_segment(input: &str) -> ParserResult<Token> {
    context(
        "segment",
        alt((
            map(pair(parse_bare, opt(parse_quoted)), |(text, quoted)| {
                Token::Segment {
                    text: text.trim_end().to_string(),
                    quoted,
                }
            }),
            map(parse_quoted, |quoted| Token::Segment {
                text: String::new(),
                quoted: Some(quoted),
            }),
        )),
    )(input)
}

fn parse_token(input: &str) -> ParserResult<Token> {
    preceded(multispace0, alt((parse_delimiter, parse_segment)))(input)
}

/// Splits an expression into delimiters and segments. Whitespace before a
/// token and at the end of a bare segment is dropped.
pub fn tokenize(expression: &str) -> ExpressionResult<Vec<Token>> {
    let parsed = all_consuming(terminated(many0(parse_token), multispace0))(expression);
    match parsed {
        Ok((_, tokens)) => Ok(tokens),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ExpressionError::Syntax {
            expression: expression.to_string(),
            message: nom::error::convert_error(expression, e),
        }),
        Err(nom::Err::Incomplete(_)) => Err(ExpressionError::Syntax {
            expression: expression.to_string(),
            message: "unexpected end of expression".to_string(),
        }),
    }
}
