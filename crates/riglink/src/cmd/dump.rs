use riglink::frame::FrameLayout;
use riglink::record::read_records;

use crate::cmd::DumpArgs;
use crate::exit::{recording_error, CliError, CliResult, SUCCESS};
use crate::output::{print_records, OutputFormat};

pub fn run(args: DumpArgs, format: OutputFormat) -> CliResult<i32> {
    if args.slots == 0 {
        return Err(CliError::usage("--slots must be at least 1"));
    }

    let mut layout = FrameLayout::new(args.slots, args.slot_format)
        .with_sequence(args.sequenced)
        .with_checksum(args.checksum);
    if let Some(scale) = args.scale {
        layout = layout.with_scale(scale);
    }
    layout
        .validate()
        .map_err(|err| CliError::usage(format!("invalid frame settings: {err}")))?;

    let context = format!("failed to read {}", args.path.display());
    let mut records =
        read_records(&args.path, &layout).map_err(|err| recording_error(&context, err))?;
    if let Some(limit) = args.limit {
        records.truncate(limit);
    }

    print_records(&records, format);
    Ok(SUCCESS)
}
