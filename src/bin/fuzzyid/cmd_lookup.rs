use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::io::Write;

use fuzzyid::frequency::FrequencyModel;
use fuzzyid::phonetic::phonetic_key;
use fuzzyid::record::{canonicalise, FieldKind, PartialDate, Postcode, Sex};

use crate::args;
use crate::util;

/// What the frequency model says about one identifier value.
#[derive(Debug, Serialize)]
struct LookupRow {
    field: FieldKind,
    input: String,
    canonical: Option<String>,

    /// The phonetic code of a name, or the district of a postcode
    group: Option<String>,

    frequency: Option<f64>,
    group_frequency: Option<f64>,
    in_reference_data: bool,
    note: Option<String>,
}

impl LookupRow {
    fn new(field: FieldKind, input: &str) -> Self {
        LookupRow {
            field,
            input: input.to_string(),
            canonical: None,
            group: None,
            frequency: None,
            group_frequency: None,
            in_reference_data: false,
            note: None,
        }
    }

    fn with_note<S: Into<String>>(mut self, note: S) -> Self {
        self.note = Some(note.into());
        self
    }
}

fn lookup_name(model: &FrequencyModel, field: FieldKind, input: &str) -> LookupRow {
    let row = LookupRow::new(field, input);
    let table = match field {
        FieldKind::Forename => model.forenames(),
        _ => model.surnames(),
    };
    let (table, freq) = match (table, model.name_frequency(field, input)) {
        (Some(table), Some(freq)) => (table, freq),
        _ => return row.with_note("field disabled"),
    };
    let canonical = canonicalise(input);
    LookupRow {
        in_reference_data: table.get(&canonical).is_some(),
        group: Some(phonetic_key(&canonical)),
        canonical: Some(canonical),
        frequency: Some(freq.value),
        group_frequency: Some(freq.phonetic),
        ..row
    }
}

fn lookup_dob(model: &FrequencyModel, input: &str) -> LookupRow {
    let row = LookupRow::new(FieldKind::DateOfBirth, input);
    let date: PartialDate = match input.parse() {
        Ok(date) => date,
        Err(e) => return row.with_note(e.to_string()),
    };
    let dist = match model.birth_dates() {
        Some(dist) => dist,
        None => return row.with_note("field disabled"),
    };
    LookupRow {
        canonical: Some(date.to_string()),
        group: Some(format!("{:04}", date.year())),
        frequency: model.probability_of(FieldKind::DateOfBirth, input),
        group_frequency: Some(dist.p_year()),
        in_reference_data: (dist.first_year()..=dist.last_year()).contains(&date.year()),
        ..row
    }
}

fn lookup_sex(model: &FrequencyModel, input: &str) -> LookupRow {
    let row = LookupRow::new(FieldKind::Sex, input);
    let sex: Sex = match input.parse() {
        Ok(sex) => sex,
        Err(e) => return row.with_note(e.to_string()),
    };
    match (model.sexes(), model.sex_frequency(sex)) {
        (Some(table), Some(freq)) => LookupRow {
            canonical: Some(sex.code().to_string()),
            frequency: Some(freq),
            in_reference_data: table.get(sex.code()).is_some(),
            ..row
        },
        _ => row.with_note("field disabled"),
    }
}

fn lookup_postcode(model: &FrequencyModel, input: &str) -> LookupRow {
    let row = LookupRow::new(FieldKind::Postcode, input);
    let postcode: Postcode = match input.parse() {
        Ok(p) => p,
        Err(e) => return row.with_note(e.to_string()),
    };
    match (model.postcodes(), model.postcode_frequency(&postcode)) {
        (Some(table), Some(freq)) => LookupRow {
            canonical: Some(postcode.to_string()),
            group: Some(postcode.district().to_string()),
            frequency: freq.unit,
            group_frequency: Some(freq.district),
            in_reference_data: table.get(postcode.district()).is_some(),
            ..row
        },
        _ => row.with_note("field disabled"),
    }
}

pub fn run(global_args: &args::GlobalArgs, args: &args::LookupArgs) -> Result<()> {
    if args.is_empty() {
        bail!("Nothing to look up; give at least one of --forename, --surname, --dob, --sex, or --postcode");
    }
    let model = util::load_model(&args.frequency_args)?;

    let mut rows = Vec::new();
    rows.extend(args.forename.iter().map(|v| lookup_name(&model, FieldKind::Forename, v)));
    rows.extend(args.surname.iter().map(|v| lookup_name(&model, FieldKind::Surname, v)));
    rows.extend(args.dob.iter().map(|v| lookup_dob(&model, v)));
    rows.extend(args.sex.iter().map(|v| lookup_sex(&model, v)));
    rows.extend(args.postcode.iter().map(|v| lookup_postcode(&model, v)));

    // Tables going to the terminal keep their styling
    if args.output_args.format == args::ReportFormat::Human && args.output_args.output.is_none() {
        lookup_table(&rows).print_tty(global_args.use_color())?;
        return Ok(());
    }

    let mut writer = args
        .output_args
        .get_writer()
        .context("Failed to open output destination for writing")?;

    let mut run_inner = move || -> std::io::Result<()> {
        match &args.output_args.format {
            args::ReportFormat::Human => {
                lookup_table(&rows).print(&mut writer)?;
            }
            args::ReportFormat::Json => {
                serde_json::to_writer_pretty(&mut writer, &rows)?;
                writeln!(writer)?;
            }
            args::ReportFormat::Jsonl => {
                for row in rows.iter() {
                    serde_json::to_writer(&mut writer, row)?;
                    writeln!(writer)?;
                }
            }
        }
        writer.flush()
    };
    util::ignore_broken_pipe(run_inner())
}

fn format_frequency(p: Option<f64>) -> String {
    p.map(|p| format!("{p:.3e}")).unwrap_or_default()
}

fn lookup_table(rows: &[LookupRow]) -> prettytable::Table {
    use prettytable::row;

    let mut table: prettytable::Table = rows
        .iter()
        .map(|r| {
            row![
                l -> r.field,
                l -> &r.input,
                l -> r.canonical.as_deref().unwrap_or(""),
                l -> r.group.as_deref().unwrap_or(""),
                r -> format_frequency(r.frequency),
                r -> format_frequency(r.group_frequency),
                c -> if r.in_reference_data { "yes" } else { "no" },
                l -> r.note.as_deref().unwrap_or(""),
            ]
        })
        .collect();
    table.set_format(util::table_format());
    table.set_titles(row![
        lb -> "Field",
        lb -> "Value",
        lb -> "Canonical",
        lb -> "Phonetic / District",
        cb -> "Frequency",
        cb -> "Group Frequency",
        cb -> "Known",
        lb -> "Note",
    ]);
    table
}
