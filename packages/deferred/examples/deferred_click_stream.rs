//! Turns simulated click events into a sequence that is handled one click at a time, giving up
//! on the whole stream of clicks one second after starting to handle it.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use deferred::{Clock, EventSource, Runtime, event_stream, queue_task_after, spawn, wait, with_timeout};

/// Stands in for a UI toolkit that calls its listeners whenever the user clicks.
#[derive(Default)]
struct Button {
    listeners: Vec<Box<dyn FnMut(u32)>>,
}

impl Button {
    fn click(&mut self, x: u32) {
        for listener in &mut self.listeners {
            listener(x);
        }
    }
}

impl EventSource<u32> for Button {
    fn add_listener(&mut self, listener: Box<dyn FnMut(u32)>) {
        self.listeners.push(listener);
    }
}

fn main() {
    let runtime = Runtime::builder().clock(Clock::Virtual).build();

    let button = Rc::new(RefCell::new(Button::default()));
    let clicks = event_stream(&mut *button.borrow_mut());

    // Three quick clicks, then one long after we stopped waiting.
    for (delay_ms, x) in [(10, 1), (20, 2), (30, 3), (5_000, 4)] {
        let button = Rc::clone(&button);
        queue_task_after(Duration::from_millis(delay_ms), move || {
            button.borrow_mut().click(x);
        });
    }

    let handled = spawn(async move {
        let mut handled: u32 = 0;

        while let Ok(Some(x)) = clicks.next().await {
            println!("handling click at x={x}");

            // Handling takes a while, but clicks arriving meanwhile are buffered, not lost.
            wait::<String>(Duration::from_millis(100)).await?;
            handled = handled.saturating_add(1);
        }

        Ok::<_, String>(handled)
    });

    let bounded = with_timeout(handled, Duration::from_secs(1), || {
        "stopped waiting for more clicks".to_string()
    });

    match runtime.block_on(bounded) {
        Ok(Ok(count)) => println!("handled {count} clicks"),
        Ok(Err(reason)) => println!("{reason}"),
        Err(stalled) => println!("{stalled}"),
    }
}
