//! Starter component sources for the editor.

const BASIC: &str = r#"import React from 'react';

export default function MyComponent({ title = 'Hello', message = 'Edit this component to get started.' }) {
  return (
    <div className="custom-component">
      <h3>{title}</h3>
      <p>{message}</p>
    </div>
  );
}
"#;

const COUNTER: &str = r#"import React, { useState } from 'react';

export default function Counter({ initialValue = 0, step = 1, label = 'Count' }) {
  const [count, setCount] = useState(initialValue);

  return (
    <div className="counter">
      <h3 className="counter-label">{label}</h3>
      <span className="counter-value">{count}</span>
      <div className="counter-actions">
        <button onClick={() => setCount(count - step)}>-{step}</button>
        <button onClick={() => setCount(initialValue)}>Reset</button>
        <button onClick={() => setCount(count + step)}>+{step}</button>
      </div>
    </div>
  );
}
"#;

const TIMER: &str = r#"import React, { useState } from 'react';

function formatElapsed(ms) {
  const seconds = Math.floor(ms / 1000);
  const minutes = Math.floor(seconds / 60);
  return `${minutes}:${String(seconds % 60).padStart(2, '0')}`;
}

export default function Timer({ title = 'Stopwatch', maxLaps = 5 }) {
  const [startedAt, setStartedAt] = useState(null);
  const [laps, setLaps] = useState([]);

  const lap = () => {
    if (startedAt === null) {
      setStartedAt(Date.now());
      return;
    }
    setLaps([...laps, Date.now() - startedAt].slice(-maxLaps));
  };

  return (
    <div className="timer">
      <h3>{title}</h3>
      <button onClick={lap}>{startedAt === null ? 'Start' : 'Lap'}</button>
      <ol className="timer-laps">
        {laps.map((ms, i) => (
          <li key={i}>{formatElapsed(ms)}</li>
        ))}
      </ol>
    </div>
  );
}
"#;

const PROGRESS_BAR: &str = r#"import React from 'react';

export default function ProgressBar({ value = 40, max = 100, label = 'Progress', color = '#4f46e5' }) {
  const percent = Math.min(100, Math.max(0, Math.round((value / max) * 100)));

  return (
    <div className="progress">
      <div className="progress-header">
        <span>{label}</span>
        <span>{percent}%</span>
      </div>
      <div className="progress-track" style={{ background: '#e5e7eb', borderRadius: 4 }}>
        <div
          className="progress-fill"
          style={{ width: `${percent}%`, background: color, height: 8, borderRadius: 4 }}
        />
      </div>
    </div>
  );
}
"#;

const CALCULATOR: &str = r#"import React, { useState } from 'react';

const OPERATIONS = {
  '+': (a, b) => a + b,
  '-': (a, b) => a - b,
  '×': (a, b) => a * b,
  '÷': (a, b) => (b === 0 ? NaN : a / b),
};

export default function Calculator({ precision = 4 }) {
  const [display, setDisplay] = useState('0');
  const [pending, setPending] = useState(null);

  const input = (digit) => setDisplay(display === '0' ? String(digit) : display + digit);

  const operate = (symbol) => {
    const current = parseFloat(display);
    if (pending) {
      const result = OPERATIONS[pending.symbol](pending.value, current);
      setPending({ symbol, value: result });
    } else {
      setPending({ symbol, value: current });
    }
    setDisplay('0');
  };

  const equals = () => {
    if (!pending) return;
    const result = OPERATIONS[pending.symbol](pending.value, parseFloat(display));
    setDisplay(String(Number(result.toFixed(precision))));
    setPending(null);
  };

  return (
    <div className="calculator">
      <output className="calculator-display">{display}</output>
      <div className="calculator-keys">
        {[7, 8, 9, 4, 5, 6, 1, 2, 3, 0].map((digit) => (
          <button key={digit} onClick={() => input(digit)}>{digit}</button>
        ))}
        {Object.keys(OPERATIONS).map((symbol) => (
          <button key={symbol} onClick={() => operate(symbol)}>{symbol}</button>
        ))}
        <button onClick={equals}>=</button>
      </div>
    </div>
  );
}
"#;

const TEMPLATES: &[(&str, &str)] = &[
    ("basic", BASIC),
    ("counter", COUNTER),
    ("timer", TIMER),
    ("progress-bar", PROGRESS_BAR),
    ("calculator", CALCULATOR),
];

/// Source of the named template, or the basic template for unknown names.
pub fn create_component_template(name: &str) -> &'static str {
    TEMPLATES
        .iter()
        .find(|(template, _)| *template == name)
        .map(|(_, code)| *code)
        .unwrap_or(BASIC)
}

pub fn available_templates() -> Vec<&'static str> {
    TEMPLATES.iter().map(|(name, _)| *name).collect()
}
