//! Smoke-test programs.
//!
//! Both build the same flowgraph: a null source feeding a head block that
//! stops after `SAMPLES` items, terminated by a null sink.

pub const SAMPLES: usize = 1024;

pub fn native_program() -> String {
  format!(
    r#"#include <gnuradio/top_block.h>
#include <gnuradio/blocks/null_source.h>
#include <gnuradio/blocks/null_sink.h>
#include <gnuradio/blocks/head.h>
#include <gnuradio/gr_complex.h>

class top_block : public gr::top_block {{
public:
  top_block();
private:
  gr::blocks::null_source::sptr null_source;
  gr::blocks::null_sink::sptr null_sink;
  gr::blocks::head::sptr head;
}};

top_block::top_block() : gr::top_block("Top block") {{
  long s = sizeof(gr_complex);
  null_source = gr::blocks::null_source::make(s);
  null_sink = gr::blocks::null_sink::make(s);
  head = gr::blocks::head::make(s, {samples});
  connect(null_source, 0, head, 0);
  connect(head, 0, null_sink, 0);
}}

int main(int argc, char **argv) {{
  top_block top;
  top.run();
}}
"#,
    samples = SAMPLES
  )
}

pub fn python_program() -> String {
  format!(
    r#"from gnuradio import blocks
from gnuradio import gr


class top_block(gr.top_block):
    def __init__(self):
        gr.top_block.__init__(self, "Top Block")
        s = gr.sizeof_gr_complex
        self.source = blocks.null_source(s)
        self.sink = blocks.null_sink(s)
        self.head = blocks.head(s, {samples})
        self.connect((self.source, 0), (self.head, 0))
        self.connect((self.head, 0), (self.sink, 0))


def main():
    tb = top_block()
    tb.start()
    tb.wait()


main()
"#,
    samples = SAMPLES
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn programs_build_the_same_flowgraph() {
    let native = native_program();
    assert!(native.contains("head::make(s, 1024)"));
    assert!(native.contains("connect(head, 0, null_sink, 0)"));

    let python = python_program();
    assert!(python.contains("blocks.head(s, 1024)"));
    assert!(python.contains("self.connect((self.head, 0), (self.sink, 0))"));
  }
}
