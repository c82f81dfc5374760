//! Parsing of embedded command annotations in PGN comments.
//!
//! Only the clock annotation is needed for feature extraction:
//! `{ [%eval 0.17] [%clk 0:03:00] }` yields 180 seconds.

use nom::{
    bytes::complete::{tag, take_until},
    character::complete::{char, digit1, space0, space1},
    combinator::{map_res, opt, recognize},
    sequence::delimited,
    IResult, Parser,
};

/// Parser for a clock value `h:mm:ss` or `h:mm:ss.f`, returned in seconds.
fn time_value(input: &str) -> IResult<&str, f32> {
    map_res(
        (
            digit1,
            char(':'),
            digit1,
            char(':'),
            recognize((digit1, opt((char('.'), digit1)))),
        ),
        |(h, _, m, _, s): (&str, char, &str, char, &str)| -> Result<f32, std::num::ParseFloatError> {
            Ok(h.parse::<f32>()? * 3600.0 + m.parse::<f32>()? * 60.0 + s.parse::<f32>()?)
        },
    )
    .parse(input)
}

/// Parser for a `[%clk ...]` tag.
fn clk_tag(input: &str) -> IResult<&str, f32> {
    delimited((tag("[%clk"), space1), time_value, (space0, char(']'))).parse(input)
}

/// Returns the first well-formed clock annotation in `comment`, in seconds.
pub fn parse_clock(comment: &str) -> Option<f32> {
    let mut rest = comment;
    loop {
        let (at_tag, _) = take_until::<_, _, nom::error::Error<&str>>("[%clk")
            .parse(rest)
            .ok()?;
        match clk_tag(at_tag) {
            Ok((_, seconds)) => return Some(seconds),
            // Skip a malformed tag and keep looking.
            Err(_) => rest = &at_tag[1..],
        }
    }
}
