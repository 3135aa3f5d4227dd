#[cfg(test)]
mod dispatcher_tests;
#[cfg(test)]
mod notifier_tests;

#[cfg(test)]
mod tests {
    use crate::event::EventPriority;

    #[test]
    fn test_event_priority_default() {
        assert_eq!(EventPriority::default(), EventPriority::Normal);
    }

    #[test]
    fn test_event_priority_values() {
        assert_eq!(EventPriority::Low as u32, 0);
        assert_eq!(EventPriority::Normal as u32, 1);
        assert_eq!(EventPriority::High as u32, 2);
    }
}
