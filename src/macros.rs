// Colours only apply when stdout is a terminal; redirected output stays plain.
#[allow(unused_macros)]
macro_rules! paint {
    ($colour:expr, $($arg:tt)*) => (
        {
            use atty::Stream;
            if atty::is(Stream::Stdout) {
                format!("{}", $colour.paint(format!($($arg)*)))
            } else {
                format!($($arg)*)
            }
        }
    )
}

#[allow(unused_macros)]
macro_rules! green {
    ($($arg:tt)*) => (
        paint!(ansi_term::Colour::Green, $($arg)*)
    )
}

#[allow(unused_macros)]
macro_rules! red {
    ($($arg:tt)*) => (
        paint!(ansi_term::Colour::Red, $($arg)*)
    )
}

#[allow(unused_macros)]
macro_rules! yellow {
    ($($arg:tt)*) => (
        paint!(ansi_term::Colour::Yellow, $($arg)*)
    )
}

#[allow(unused_macros)]
macro_rules! blue {
    ($($arg:tt)*) => (
        paint!(ansi_term::Colour::Cyan, $($arg)*)
    )
}
