//! Line-level parsing for the assembler.
//!
//! The assembler routes each source line into the text or data section
//! first, then hands the line to one of the entry points here. Parsing a
//! line at a time keeps error reporting per-line (with source line
//! numbers) while the grammar itself lives in `grammar.pest`.

use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "src/grammar.pest"]
pub struct AsmLineParser;

pub type ParseError = Box<pest::error::Error<Rule>>;

/// One operand of a text instruction, still in source form. Register
/// aliases written `tN` arrive as [`Operand::Literal`] because they share
/// the identifier shape; the extractors in `asm` accept either spelling
/// where a register is expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Reg(String),
    Literal(String),
    Mem { offset: String, base: String },
}

#[derive(Debug, Clone, Default)]
pub struct TextLine {
    pub label: Option<String>,
    pub mnemonic: Option<String>,
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone)]
pub struct DataLine {
    pub label: String,
    pub directive: String,
    pub values: Vec<String>,
}

pub fn parse_text_line(src: &str) -> Result<TextLine, ParseError> {
    let parsed = AsmLineParser::parse(Rule::text_line, src)
        .map_err(Box::new)?
        .next()
        .unwrap();

    let mut line = TextLine::default();
    for pair in parsed.into_inner() {
        match pair.as_rule() {
            Rule::label_def => {
                let ident = pair.into_inner().next().unwrap();
                line.label = Some(ident.as_str().to_string());
            }
            Rule::instruction => {
                let mut it = pair.into_inner();
                line.mnemonic = Some(it.next().unwrap().as_str().to_string());
                if let Some(ops) = it.next() {
                    line.operands = ops.into_inner().map(operand_from_pair).collect();
                }
            }
            Rule::EOI => {}
            _ => unreachable!(),
        }
    }
    Ok(line)
}

pub fn parse_data_line(src: &str) -> Result<DataLine, ParseError> {
    let parsed = AsmLineParser::parse(Rule::data_line, src)
        .map_err(Box::new)?
        .next()
        .unwrap();

    let mut label = String::new();
    let mut directive = String::new();
    let mut values = Vec::new();
    for pair in parsed.into_inner() {
        match pair.as_rule() {
            Rule::label_def => {
                label = pair.into_inner().next().unwrap().as_str().to_string();
            }
            Rule::directive => directive = pair.as_str().to_string(),
            Rule::value_list => {
                values = pair.into_inner().map(|v| v.as_str().to_string()).collect();
            }
            Rule::EOI => {}
            _ => unreachable!(),
        }
    }
    Ok(DataLine {
        label,
        directive,
        values,
    })
}

fn operand_from_pair(pair: pest::iterators::Pair<'_, Rule>) -> Operand {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::reg => Operand::Reg(inner.as_str().to_string()),
        Rule::literal => Operand::Literal(inner.as_str().to_string()),
        Rule::mem => {
            let mut it = inner.into_inner();
            let offset = it.next().unwrap().as_str().to_string();
            let base = it.next().unwrap().as_str().to_string();
            Operand::Mem { offset, base }
        }
        _ => unreachable!(),
    }
}
